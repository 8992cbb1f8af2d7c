use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable failure classes carried in `error.code` of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    NotFound,
    BadRequest,
    RateLimited,
    UserFetchFailed,
    NetworkError,
    ValidationError,
    ToolError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => codes::AUTH,
            ErrorKind::NotFound => codes::NOT_FOUND,
            ErrorKind::BadRequest => codes::BAD_REQUEST,
            ErrorKind::RateLimited => codes::RATE_LIMITED,
            ErrorKind::UserFetchFailed => codes::USER_FETCH_FAILED,
            ErrorKind::NetworkError => codes::NETWORK_ERROR,
            ErrorKind::ValidationError => codes::VALIDATION_ERROR,
            ErrorKind::ToolError => codes::TOOL_ERROR,
            ErrorKind::UnknownError => codes::UNKNOWN_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes used across the envelope
pub mod codes {
    pub const AUTH: &str = "auth";
    pub const NOT_FOUND: &str = "not_found";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const USER_FETCH_FAILED: &str = "user_fetch_failed";
    pub const NETWORK_ERROR: &str = "network_error";
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const TOOL_ERROR: &str = "tool_error";
    pub const UNKNOWN_ERROR: &str = "unknown_error";
}

/// First violated constraint found while checking caller arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Which field caused the error (absent when the input itself is not an object)
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}
