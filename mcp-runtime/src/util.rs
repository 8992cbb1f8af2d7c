use serde_json::Value;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// JSON when the body parses, the raw text otherwise, `null` when empty.
pub fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

/// Strip the top-level `records` wrapper VRM puts around most payloads.
pub fn unwrap_records(mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        if let Some(records) = map.remove("records") {
            return records;
        }
    }
    body
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
