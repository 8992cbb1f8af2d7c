//! Shaping of `data-download` payloads.
//!
//! VRM answers every export with a base64 blob. CSV exports are decoded into
//! records when the caller asks for it (the default); anything that fails to
//! decode degrades to the base64 wrapper instead of failing the call.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Number, Value, json};
use thiserror::Error;
use vrm_core::Envelope;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("payload is not a base64 string")]
    NotText,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded content is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("no header row")]
    MissingHeader,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub site_id: i64,
    pub datatype: String,
    pub format: String,
    /// Epoch milliseconds
    pub start: Option<i64>,
    /// Epoch milliseconds
    pub end: Option<i64>,
    pub decode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCsv {
    pub columns: Vec<String>,
    pub records: Vec<Map<String, Value>>,
}

impl DownloadRequest {
    fn wants_parsing(&self) -> bool {
        self.decode && self.format.eq_ignore_ascii_case("csv")
    }

    pub fn filename(&self) -> String {
        let mut name = format!("vrm_{}_{}", self.site_id, self.datatype);
        if self.start.is_some() || self.end.is_some() {
            let bound = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_default();
            name.push_str(&format!("_{}-{}", bound(self.start), bound(self.end)));
        }
        format!("{name}.{}", self.format)
    }

    pub fn time_range(&self) -> Value {
        let mut range = json!({ "start": self.start, "end": self.end });
        if let Some(iso) = self.start.and_then(iso_millis) {
            range["startIso"] = Value::String(iso);
        }
        if let Some(iso) = self.end.and_then(iso_millis) {
            range["endIso"] = Value::String(iso);
        }
        range
    }

    fn wrapped(&self, content: Value) -> Value {
        json!({
            "format": self.format,
            "datatype": self.datatype,
            "timeRange": self.time_range(),
            "content": content,
            "encoding": "base64",
            "filename": self.filename(),
        })
    }
}

/// Replace a successful download envelope's payload with its shaped form.
/// Failure envelopes pass through untouched.
pub fn shape_download(mut envelope: Envelope, request: &DownloadRequest) -> Envelope {
    if !envelope.ok {
        return envelope;
    }
    let original = std::mem::take(&mut envelope.data);

    if !request.wants_parsing() {
        envelope.data = request.wrapped(original);
        return envelope;
    }

    match parse_csv_payload(&original) {
        Ok(parsed) => {
            let note = format!(
                "CSV parsed: {} records, {} columns",
                parsed.records.len(),
                parsed.columns.len()
            );
            envelope.data = json!({
                "format": request.format,
                "datatype": request.datatype,
                "timeRange": request.time_range(),
                "records": parsed.records,
                "summary": {
                    "totalRecords": parsed.records.len(),
                    "columns": parsed.columns,
                },
            });
            envelope.with_note(note)
        }
        Err(err) => {
            tracing::warn!(error = %err, "CSV download could not be parsed, returning base64");
            envelope.data = request.wrapped(original);
            envelope.with_note(format!(
                "CSV parsing failed ({err}); returning the original base64 content"
            ))
        }
    }
}

pub fn parse_csv_payload(payload: &Value) -> Result<ParsedCsv, CsvError> {
    let encoded = match payload {
        Value::String(text) => text.as_str(),
        Value::Object(map) => map
            .get("data")
            .and_then(Value::as_str)
            .ok_or(CsvError::NotText)?,
        _ => return Err(CsvError::NotText),
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact)?;
    let text = String::from_utf8(bytes)?;
    parse_csv_text(&text)
}

/// Comma-split CSV without quoting rules; first non-blank line is the header.
pub fn parse_csv_text(text: &str) -> Result<ParsedCsv, CsvError> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header = lines.next().ok_or(CsvError::MissingHeader)?;
    let columns: Vec<String> = header
        .trim_start_matches('\u{feff}')
        .split(',')
        .map(|name| name.trim().to_string())
        .collect();

    let records = lines
        .map(|line| {
            let mut values = line.split(',');
            columns
                .iter()
                .map(|column| {
                    let value = values.next().map(coerce_value).unwrap_or(Value::Null);
                    (column.clone(), value)
                })
                .collect::<Map<String, Value>>()
        })
        .collect();

    Ok(ParsedCsv { columns, records })
}

/// Numbers when the trimmed text parses as one, trimmed text otherwise.
pub fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(trimmed.to_string())),
        _ => Value::String(trimmed.to_string()),
    }
}

fn iso_millis(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vrm_core::ErrorKind;

    use super::*;

    fn request(format: &str, decode: bool) -> DownloadRequest {
        DownloadRequest {
            site_id: 4242,
            datatype: "log".to_string(),
            format: format.to_string(),
            start: Some(1_700_000_000_000),
            end: None,
            decode,
        }
    }

    fn ok_envelope(data: Value) -> Envelope {
        Envelope::success(
            "/installations/4242/data-download",
            200,
            data,
            Duration::from_millis(5),
        )
    }

    #[test]
    fn single_row_csv_coerces_numbers() {
        // "timestamp,voltage\n1,12.4"
        let parsed = parse_csv_payload(&json!("dGltZXN0YW1wLHZvbHRhZ2UKMSwxMi40")).unwrap();
        assert_eq!(parsed.columns, ["timestamp", "voltage"]);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(
            Value::Object(parsed.records[0].clone()),
            json!({ "timestamp": 1, "voltage": 12.4 })
        );
    }

    #[test]
    fn blank_lines_are_skipped_and_text_is_trimmed() {
        let parsed =
            parse_csv_text("timestamp,voltage,state\n\n1700000000000,12.4,Bulk\r\n1700000060000,12.6, Float \n")
                .unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[1]["state"], json!("Float"));
        assert_eq!(parsed.records[0]["timestamp"], json!(1_700_000_000_000_i64));
    }

    #[test]
    fn short_rows_fill_null_and_extra_values_are_dropped() {
        let parsed = parse_csv_text("a,b,c\n1,2\n4,5,6,7").unwrap();
        assert_eq!(parsed.records[0]["c"], Value::Null);
        assert_eq!(
            Value::Object(parsed.records[1].clone()),
            json!({ "a": 4, "b": 5, "c": 6 })
        );
    }

    #[test]
    fn column_order_is_preserved() {
        let parsed = parse_csv_text("zeta,alpha,mid\n1,2,3").unwrap();
        let keys: Vec<_> = parsed.records[0].keys().cloned().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn coercion_is_loose_like_a_number_check() {
        assert_eq!(coerce_value(" 42 "), json!(42));
        assert_eq!(coerce_value("-3.5"), json!(-3.5));
        assert_eq!(coerce_value("1e3"), json!(1000.0));
        assert_eq!(coerce_value("0612345678"), json!(612345678));
        assert_eq!(coerce_value("12V"), json!("12V"));
        assert_eq!(coerce_value("NaN"), json!("NaN"));
        assert_eq!(coerce_value(""), json!(""));
    }

    #[test]
    fn empty_content_has_no_header() {
        // "\n\n"
        assert!(matches!(
            parse_csv_payload(&json!("Cgo=")),
            Err(CsvError::MissingHeader)
        ));
    }

    #[test]
    fn decoded_csv_replaces_payload_with_records_and_summary() {
        let env = shape_download(
            ok_envelope(json!("dGltZXN0YW1wLHZvbHRhZ2UKMSwxMi40")),
            &request("csv", true),
        );
        assert!(env.ok);
        assert_eq!(env.data["summary"]["totalRecords"], json!(1));
        assert_eq!(env.data["summary"]["columns"], json!(["timestamp", "voltage"]));
        assert_eq!(env.data["records"][0]["voltage"], json!(12.4));
        assert_eq!(
            env.data["timeRange"]["startIso"],
            json!("2023-11-14T22:13:20.000Z")
        );
        assert!(env.data["timeRange"].get("endIso").is_none());
        assert!(env.meta.note.as_deref().is_some_and(|n| n.contains("CSV parsed")));
    }

    #[test]
    fn malformed_payload_degrades_to_base64_wrapper() {
        let env = shape_download(ok_envelope(json!("not base64!!")), &request("csv", true));
        assert!(env.ok);
        assert_eq!(env.data["content"], json!("not base64!!"));
        assert_eq!(env.data["encoding"], json!("base64"));
        assert!(env.meta.note.as_deref().is_some_and(|n| n.contains("CSV parsing failed")));
    }

    #[test]
    fn non_csv_or_undecoded_is_wrapped_without_parsing() {
        let env = shape_download(ok_envelope(json!("UEsDBA==")), &request("xlsx", true));
        assert_eq!(env.data["content"], json!("UEsDBA=="));
        assert_eq!(env.data["filename"], json!("vrm_4242_log_1700000000000-.xlsx"));
        assert!(env.meta.note.is_none());

        let env = shape_download(
            ok_envelope(json!("dGltZXN0YW1wLHZvbHRhZ2UKMSwxMi40")),
            &request("csv", false),
        );
        assert_eq!(env.data["format"], json!("csv"));
        assert!(env.data.get("records").is_none());
    }

    #[test]
    fn failed_download_passes_through() {
        let failed = Envelope::failure(
            "/installations/4242/data-download",
            404,
            ErrorKind::NotFound,
            "missing",
            Value::Null,
            Duration::ZERO,
        );
        let env = shape_download(failed.clone(), &request("csv", true));
        assert_eq!(env, failed);
    }
}
