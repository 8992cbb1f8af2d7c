use std::time::Instant;

use reqwest::header::ACCEPT;
use serde_json::Value;
use thiserror::Error;
use vrm_core::tools::{
    Behavior, DEFAULT_DOWNLOAD_DATATYPE, DEFAULT_DOWNLOAD_FORMAT, FieldRole, ToolSpec, find_tool,
};
use vrm_core::validate::{ArgValue, ValidatedArgs, validate};
use vrm_core::{Envelope, ErrorKind};

use crate::allowlist::Allowlist;
use crate::config::VrmConfig;
use crate::download::{DownloadRequest, shape_download};
use crate::util::{client, parse_response_body, unwrap_records};

pub const AUTH_HEADER: &str = "X-Authorization";
const CURRENT_USER_PATH: &str = "/users/me";

pub const AUTH_FAILED_MESSAGE: &str =
    "Authentication failed. Check VRM_API_TOKEN and that VRM_TOKEN_KIND matches the token type.";
pub const TIMEZONE_NOTE: &str = "Relative periods (today, yesterday, month, year) may be computed in UTC rather than the installation's local timezone. Use type=custom with explicit start/end for exact local boundaries.";
pub const EMPTY_GRAPH_NOTE: &str = "Graph widget returned empty data. Try vrm_get_stats or vrm_get_overall_stats with the same attribute codes.";

/// Raised for invariant violations; remote failures become envelopes instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Path '{0}' is not on the VRM allowlist")]
    PathNotAllowed(String),
    #[error("Cannot resolve path template '{0}': identifier missing")]
    UnresolvedPath(String),
    #[error("Invalid VRM URL for '{path}': {reason}")]
    InvalidUrl { path: String, reason: String },
}

impl DispatchError {
    /// Resolved path involved in the failure, when there is one.
    pub fn path(&self) -> &str {
        match self {
            DispatchError::PathNotAllowed(path) => path,
            DispatchError::InvalidUrl { path, .. } => path,
            DispatchError::UnknownTool(_) | DispatchError::UnresolvedPath(_) => "",
        }
    }
}

pub struct Dispatcher {
    config: VrmConfig,
    http: reqwest::Client,
    allowlist: &'static Allowlist,
}

impl Dispatcher {
    pub fn new(config: VrmConfig) -> Self {
        Self {
            config,
            http: client(),
            allowlist: Allowlist::vrm(),
        }
    }

    pub fn config(&self) -> &VrmConfig {
        &self.config
    }

    /// Validate raw arguments for `tool`, then execute it.
    pub async fn call(&self, tool: &str, raw: &Value) -> Result<Envelope, DispatchError> {
        let spec = find_tool(tool).ok_or_else(|| DispatchError::UnknownTool(tool.to_string()))?;
        match validate(spec, raw) {
            Ok(args) => self.execute(spec, args).await,
            Err(err) => {
                tracing::warn!(tool, field = ?err.field, "argument validation failed: {err}");
                Ok(Envelope::validation_failure(&err))
            }
        }
    }

    pub async fn execute(
        &self,
        spec: &ToolSpec,
        args: ValidatedArgs,
    ) -> Result<Envelope, DispatchError> {
        let args = args.with_defaults(spec);
        match spec.behavior {
            Behavior::Plain => self.fetch(spec, &args, None).await,
            Behavior::InstallationsListing => self.list_installations(spec, &args).await,
            Behavior::PeriodTotals => {
                let envelope = self.fetch(spec, &args, None).await?;
                Ok(annotate_period(envelope, &args))
            }
            Behavior::GraphWidget => {
                let envelope = self.fetch(spec, &args, None).await?;
                Ok(annotate_graph(envelope))
            }
            Behavior::DataDownload => {
                let envelope = self.fetch(spec, &args, None).await?;
                Ok(shape_download(envelope, &download_request(&args)))
            }
        }
    }

    async fn fetch(
        &self,
        spec: &ToolSpec,
        args: &ValidatedArgs,
        user_id: Option<i64>,
    ) -> Result<Envelope, DispatchError> {
        let path = resolve_path(spec, args, user_id)?;
        let query = build_query(spec, args);
        tracing::debug!(tool = spec.name, path = %path, params = query.len(), "dispatching VRM request");
        self.get(&path, &query).await
    }

    async fn list_installations(
        &self,
        spec: &ToolSpec,
        args: &ValidatedArgs,
    ) -> Result<Envelope, DispatchError> {
        if args.contains("userId") {
            return self.fetch(spec, args, None).await;
        }

        let me = self.get(CURRENT_USER_PATH, &[]).await?;
        if !me.ok {
            let status = me.meta.status;
            return Ok(me.with_error(
                ErrorKind::UserFetchFailed,
                format!(
                    "Could not fetch the current user to resolve userId (status {status}). Pass userId explicitly or check credentials."
                ),
            ));
        }

        let Some(user_id) = extract_user_id(&me.data) else {
            return Ok(me.with_error(
                ErrorKind::ToolError,
                "Current user response did not contain a numeric user id",
            ));
        };
        self.fetch(spec, args, Some(user_id)).await
    }

    /// Authenticated GET of an allowlisted path.
    pub async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Envelope, DispatchError> {
        if !self.allowlist.permits(path) {
            tracing::error!(path, "refusing request to path outside the allowlist");
            return Err(DispatchError::PathNotAllowed(path.to_string()));
        }

        let mut url = reqwest::Url::parse(&format!("{}{}", self.config.base_url(), path)).map_err(
            |e| DispatchError::InvalidUrl {
                path: path.to_string(),
                reason: e.to_string(),
            },
        )?;
        if !query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }

        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .header(AUTH_HEADER, self.config.authorization())
            .header(ACCEPT, "application/json")
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(path, error = %err, "VRM request failed before a response");
                return Ok(Envelope::failure(
                    path,
                    0,
                    ErrorKind::NetworkError,
                    err.to_string(),
                    Value::Null,
                    started.elapsed(),
                ));
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => parse_response_body(&bytes),
            Err(err) => {
                tracing::warn!(path, status, error = %err, "failed to read VRM response body");
                return Ok(Envelope::failure(
                    path,
                    status,
                    ErrorKind::NetworkError,
                    format!("Failed to read response body: {err}"),
                    Value::Null,
                    started.elapsed(),
                ));
            }
        };

        let envelope = classify_response(path, status, body, started.elapsed());
        if let Some(error) = &envelope.error {
            tracing::warn!(path, status, code = %error.code, "VRM request failed");
        }
        Ok(envelope)
    }
}

/// Map an HTTP outcome onto the envelope taxonomy.
pub fn classify_response(
    path: &str,
    status: u16,
    body: Value,
    elapsed: std::time::Duration,
) -> Envelope {
    let (kind, message) = match status {
        200..=299 => return Envelope::success(path, status, unwrap_records(body), elapsed),
        401 | 403 => (ErrorKind::Auth, AUTH_FAILED_MESSAGE.to_string()),
        404 => (ErrorKind::NotFound, format!("Resource not found: {path}")),
        400 | 422 => (
            ErrorKind::BadRequest,
            body.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "Bad request".to_string()),
        ),
        429 => (
            ErrorKind::RateLimited,
            "Rate limited by the VRM API. Retry later.".to_string(),
        ),
        _ => (ErrorKind::UnknownError, format!("HTTP {status}")),
    };
    Envelope::failure(path, status, kind, message, body, elapsed)
}

pub fn resolve_path(
    spec: &ToolSpec,
    args: &ValidatedArgs,
    user_id: Option<i64>,
) -> Result<String, DispatchError> {
    let site_id = args.integer("siteId").filter(|_| {
        spec.field("siteId")
            .is_some_and(|f| f.role == FieldRole::Path)
    });
    let user_id = args.integer("userId").or(user_id);
    spec.endpoint
        .resolve(site_id, user_id)
        .ok_or_else(|| DispatchError::UnresolvedPath(spec.endpoint.template()))
}

/// Query pairs in field declaration order; arrays repeat their `[]` key.
pub fn build_query(spec: &ToolSpec, args: &ValidatedArgs) -> Vec<(String, String)> {
    let custom_period = args.text("type") == Some("custom");
    let mut pairs = Vec::new();
    for (name, value) in args.iter() {
        let Some(field) = spec.field(name) else {
            continue;
        };
        if field.role != FieldRole::Query {
            continue;
        }
        if spec.behavior == Behavior::PeriodTotals
            && matches!(name, "start" | "end")
            && !custom_period
        {
            continue;
        }
        let wire = field.wire.to_string();
        match value {
            ArgValue::Integer(n) => pairs.push((wire, n.to_string())),
            ArgValue::Text(text) => pairs.push((wire, text.clone())),
            ArgValue::Boolean(flag) => pairs.push((wire, if *flag { "1" } else { "0" }.to_string())),
            ArgValue::TextList(items) => {
                pairs.extend(items.iter().map(|item| (wire.clone(), item.clone())));
            }
        }
    }
    pairs
}

fn annotate_period(envelope: Envelope, args: &ValidatedArgs) -> Envelope {
    let explicit_range = args.text("type") == Some("custom")
        && args.contains("start")
        && args.contains("end");
    if envelope.ok && !explicit_range {
        envelope.with_note(TIMEZONE_NOTE)
    } else {
        envelope
    }
}

fn annotate_graph(envelope: Envelope) -> Envelope {
    let empty = match &envelope.data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if envelope.ok && empty {
        envelope.with_note(EMPTY_GRAPH_NOTE)
    } else {
        envelope
    }
}

fn download_request(args: &ValidatedArgs) -> DownloadRequest {
    DownloadRequest {
        site_id: args.integer("siteId").unwrap_or_default(),
        datatype: args.text("datatype").unwrap_or(DEFAULT_DOWNLOAD_DATATYPE).to_string(),
        format: args.text("format").unwrap_or(DEFAULT_DOWNLOAD_FORMAT).to_string(),
        start: args.integer("start"),
        end: args.integer("end"),
        decode: args.boolean("decode").unwrap_or(true),
    }
}

/// Numeric id from a `/users/me` payload (`{user: {id}}` or `{id}`).
fn extract_user_id(data: &Value) -> Option<i64> {
    let id = data
        .get("user")
        .and_then(|user| user.get("id"))
        .or_else(|| data.get("id"))?;
    match id {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::TokenKind;

    fn args_for(tool: &str, raw: Value) -> (&'static ToolSpec, ValidatedArgs) {
        let spec = find_tool(tool).unwrap();
        let args = validate(spec, &raw).unwrap().with_defaults(spec);
        (spec, args)
    }

    #[test]
    fn attribute_codes_repeat_in_order() {
        let (spec, args) = args_for(
            "vrm_get_stats",
            json!({ "siteId": 9, "type": "kwh", "attributeCodes": ["Pb", "Pc", "kwh"] }),
        );
        let pairs = build_query(spec, &args);
        let codes: Vec<_> = pairs
            .iter()
            .filter(|(k, _)| k == "attributeCodes[]")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(codes, ["Pb", "Pc", "kwh"]);
    }

    #[test]
    fn defaults_are_sent_and_omitted_optionals_are_not() {
        let (spec, args) = args_for("vrm_get_stats", json!({ "siteId": 9, "type": "venus" }));
        assert_eq!(
            build_query(spec, &args),
            vec![
                ("type".to_string(), "venus".to_string()),
                ("interval".to_string(), "15mins".to_string()),
            ]
        );

        let (spec, args) = args_for("vrm_get_diagnostics", json!({ "siteId": 9 }));
        assert_eq!(
            build_query(spec, &args),
            vec![("count".to_string(), "200".to_string())]
        );
    }

    #[test]
    fn path_and_local_fields_stay_off_the_query() {
        let (spec, args) = args_for("vrm_download_data", json!({ "siteId": 77, "decode": false }));
        let pairs = build_query(spec, &args);
        assert!(pairs.iter().all(|(k, _)| k != "siteId" && k != "decode"));
        assert_eq!(
            pairs,
            vec![
                ("datatype".to_string(), "log".to_string()),
                ("format".to_string(), "csv".to_string()),
            ]
        );
        assert_eq!(
            resolve_path(spec, &args, None).unwrap(),
            "/installations/77/data-download"
        );
    }

    #[test]
    fn installation_filter_uses_wire_name_and_flag_encoding() {
        let (spec, args) = args_for(
            "vrm_list_installations",
            json!({ "userId": 5, "siteId": 12, "extended": true }),
        );
        assert_eq!(
            build_query(spec, &args),
            vec![
                ("idSite".to_string(), "12".to_string()),
                ("extended".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(
            resolve_path(spec, &args, None).unwrap(),
            "/users/5/installations"
        );
    }

    #[test]
    fn listing_without_user_needs_resolved_id() {
        let (spec, args) = args_for("vrm_list_installations", json!({}));
        assert!(matches!(
            resolve_path(spec, &args, None),
            Err(DispatchError::UnresolvedPath(_))
        ));
        assert_eq!(
            resolve_path(spec, &args, Some(31)).unwrap(),
            "/users/31/installations"
        );
    }

    #[test]
    fn period_bounds_only_for_custom() {
        let (spec, args) = args_for(
            "vrm_get_overall_stats",
            json!({ "siteId": 1, "type": "today", "start": 10, "end": 20 }),
        );
        let pairs = build_query(spec, &args);
        assert!(pairs.iter().all(|(k, _)| k != "start" && k != "end"));

        let (spec, args) = args_for(
            "vrm_get_overall_stats",
            json!({ "siteId": 1, "type": "custom", "start": 10, "end": 20 }),
        );
        let pairs = build_query(spec, &args);
        assert!(pairs.contains(&("start".to_string(), "10".to_string())));
        assert!(pairs.contains(&("end".to_string(), "20".to_string())));
    }

    #[test]
    fn classification_table() {
        let elapsed = Duration::from_millis(1);
        let cases = [
            (401, ErrorKind::Auth),
            (403, ErrorKind::Auth),
            (404, ErrorKind::NotFound),
            (400, ErrorKind::BadRequest),
            (422, ErrorKind::BadRequest),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::UnknownError),
            (302, ErrorKind::UnknownError),
        ];
        for (status, kind) in cases {
            let env = classify_response("/users/me", status, Value::Null, elapsed);
            assert!(!env.ok);
            assert_eq!(env.error_kind(), Some(kind), "status {status}");
            assert_eq!(env.meta.status, status);
            assert_eq!(env.meta.rate_limited, status == 429);
        }
    }

    #[test]
    fn classification_messages() {
        let elapsed = Duration::ZERO;
        let env = classify_response(
            "/installations/1/stats",
            422,
            json!({ "message": "start must be before end" }),
            elapsed,
        );
        assert_eq!(env.error.unwrap().message, "start must be before end");
        assert_eq!(env.data["message"], json!("start must be before end"));

        let env = classify_response("/installations/1/tags", 404, Value::Null, elapsed);
        assert!(env.error.unwrap().message.contains("/installations/1/tags"));

        let env = classify_response("/firmwares", 503, Value::Null, elapsed);
        assert_eq!(env.error.unwrap().message, "HTTP 503");
    }

    #[test]
    fn success_unwraps_records() {
        let env = classify_response(
            "/installations/1/tags",
            200,
            json!({ "success": true, "records": { "tags": ["boat"] } }),
            Duration::ZERO,
        );
        assert!(env.ok);
        assert_eq!(env.data, json!({ "tags": ["boat"] }));

        let env = classify_response("/users/me", 200, json!({ "user": { "id": 1 } }), Duration::ZERO);
        assert_eq!(env.data, json!({ "user": { "id": 1 } }));
    }

    #[test]
    fn user_id_extraction_accepts_nested_and_string_ids() {
        assert_eq!(extract_user_id(&json!({ "user": { "id": 22 } })), Some(22));
        assert_eq!(extract_user_id(&json!({ "id": "23" })), Some(23));
        assert_eq!(extract_user_id(&json!({ "user": { "name": "x" } })), None);
    }

    #[test]
    fn notes_only_attach_on_success() {
        let (_, relative) = args_for("vrm_get_overall_stats", json!({ "siteId": 1, "type": "year" }));
        let ok = Envelope::success("/installations/1/overallstats", 200, json!({}), Duration::ZERO);
        assert_eq!(
            annotate_period(ok, &relative).meta.note.as_deref(),
            Some(TIMEZONE_NOTE)
        );

        let failed = classify_response("/installations/1/overallstats", 500, Value::Null, Duration::ZERO);
        assert!(annotate_period(failed, &relative).meta.note.is_none());

        let graph = Envelope::success("/installations/1/widgets/Graph", 200, json!({}), Duration::ZERO);
        assert_eq!(annotate_graph(graph).meta.note.as_deref(), Some(EMPTY_GRAPH_NOTE));
        let graph = Envelope::success(
            "/installations/1/widgets/Graph",
            200,
            json!({ "data": { "Pb": [] } }),
            Duration::ZERO,
        );
        assert!(annotate_graph(graph).meta.note.is_none());
    }

    #[tokio::test]
    async fn disallowed_path_fails_before_network() {
        let config = VrmConfig::new(
            Some("t".into()),
            Some("http://127.0.0.1:9".into()),
            TokenKind::Token,
        )
        .unwrap();
        let dispatcher = Dispatcher::new(config);
        let err = dispatcher
            .get("/invalid/path", &[])
            .await
            .expect_err("path should be refused before any request");
        assert!(matches!(err, DispatchError::PathNotAllowed(ref p) if p == "/invalid/path"));
        assert_eq!(err.path(), "/invalid/path");
    }

    #[tokio::test]
    async fn unknown_tool_is_raised_and_bad_arguments_are_enveloped() {
        let config = VrmConfig::new(Some("t".into()), Some("http://127.0.0.1:9".into()), TokenKind::Token)
            .unwrap();
        let dispatcher = Dispatcher::new(config);

        let err = dispatcher.call("vrm_nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTool(_)));

        let env = dispatcher
            .call("vrm_get_tags", &json!({ "siteId": 1, "extra": true }))
            .await
            .unwrap();
        assert!(!env.ok);
        assert_eq!(env.error_kind(), Some(ErrorKind::ValidationError));
        assert_eq!(env.meta.status, 0);
    }
}
