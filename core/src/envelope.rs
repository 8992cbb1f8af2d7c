use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorKind, ValidationError};

/// Subsystem tag stamped on every envelope.
pub const ENVELOPE_SOURCE: &str = "vrm";

/// Uniform result of one operation call — success or failure, remote or local.
/// Built once per call; only `meta.note` may be attached afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub ok: bool,
    pub source: String,
    /// Resolved remote path (empty when the call never resolved one)
    pub path: String,
    /// Per-call identifier (UUIDv7 — time-sortable)
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Remote body on success (`records` unwrapped), raw error body or null on failure
    pub data: Value,
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

/// Transport metadata about the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// HTTP status; 0 when no response was received
    pub status: u16,
    pub duration_ms: u64,
    pub rate_limited: bool,
    /// Advisory note for the caller; never changes `ok` or `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: ErrorKind,
    pub message: String,
}

impl Envelope {
    pub fn success(path: impl Into<String>, status: u16, data: Value, elapsed: Duration) -> Self {
        Self::build(path.into(), status, data, elapsed, None)
    }

    pub fn failure(
        path: impl Into<String>,
        status: u16,
        kind: ErrorKind,
        message: impl Into<String>,
        data: Value,
        elapsed: Duration,
    ) -> Self {
        let error = ErrorDescriptor {
            code: kind,
            message: message.into(),
        };
        Self::build(path.into(), status, data, elapsed, Some(error))
    }

    /// Envelope for arguments rejected before any path was resolved.
    pub fn validation_failure(err: &ValidationError) -> Self {
        Self::failure(
            "",
            0,
            ErrorKind::ValidationError,
            err.message.clone(),
            Value::Null,
            Duration::ZERO,
        )
    }

    /// Envelope the host shell returns when dispatch itself raised.
    pub fn tool_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(
            path,
            0,
            ErrorKind::ToolError,
            message,
            Value::Null,
            Duration::ZERO,
        )
    }

    fn build(
        path: String,
        status: u16,
        data: Value,
        elapsed: Duration,
        error: Option<ErrorDescriptor>,
    ) -> Self {
        let rate_limited = error
            .as_ref()
            .is_some_and(|e| e.code == ErrorKind::RateLimited);
        Self {
            ok: error.is_none(),
            source: ENVELOPE_SOURCE.to_string(),
            path,
            request_id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            data,
            meta: Meta {
                status,
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                rate_limited,
                note: None,
            },
            error,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.meta.note = Some(note.into());
        self
    }

    /// Keep status and timing but replace the failure descriptor.
    pub fn with_error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.ok = false;
        self.meta.rate_limited = kind == ErrorKind::RateLimited || self.meta.rate_limited;
        self.error = Some(ErrorDescriptor {
            code: kind,
            message: message.into(),
        });
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_envelope_serializes_camel_case_without_error() {
        let env = Envelope::success(
            "/users/me",
            200,
            json!({"id": 7}),
            Duration::from_millis(12),
        );
        let value = env.to_value();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["source"], json!("vrm"));
        assert_eq!(value["meta"]["durationMs"], json!(12));
        assert_eq!(value["meta"]["rateLimited"], json!(false));
        assert!(value.get("error").is_none());
        assert!(value["meta"].get("note").is_none());
        assert!(value["requestId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn rate_limited_failure_sets_meta_flag() {
        let env = Envelope::failure(
            "/installations/1/stats",
            429,
            ErrorKind::RateLimited,
            "slow down",
            Value::Null,
            Duration::ZERO,
        );
        assert!(!env.ok);
        assert!(env.meta.rate_limited);
        assert_eq!(env.to_value()["error"]["code"], json!("rate_limited"));
    }

    #[test]
    fn with_error_preserves_status_and_overrides_descriptor() {
        let env = Envelope::failure(
            "/users/me",
            401,
            ErrorKind::Auth,
            "bad token",
            json!({"errors": "nope"}),
            Duration::from_millis(3),
        )
        .with_error(ErrorKind::UserFetchFailed, "could not resolve user");
        assert_eq!(env.meta.status, 401);
        assert_eq!(env.error_kind(), Some(ErrorKind::UserFetchFailed));
        assert_eq!(env.data, json!({"errors": "nope"}));
    }

    #[test]
    fn request_ids_are_unique_per_envelope() {
        let a = Envelope::tool_error("", "x");
        let b = Envelope::tool_error("", "x");
        assert_ne!(a.request_id, b.request_id);
    }
}
