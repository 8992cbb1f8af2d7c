use std::fmt;

use clap::ValueEnum;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://vrmapi.victronenergy.com/v2";

/// Label sent in front of the token in `X-Authorization`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TokenKind {
    #[default]
    #[value(name = "Token")]
    Token,
    #[value(name = "Bearer")]
    Bearer,
}

impl TokenKind {
    pub fn label(self) -> &'static str {
        match self {
            TokenKind::Token => "Token",
            TokenKind::Bearer => "Bearer",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("VRM_API_TOKEN is required (pass --token or set VRM_API_TOKEN)")]
    MissingToken,
    #[error("invalid VRM base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Immutable connection settings, loaded once at startup.
#[derive(Clone)]
pub struct VrmConfig {
    token: String,
    base_url: String,
    token_kind: TokenKind,
}

impl VrmConfig {
    pub fn new(
        token: Option<String>,
        base_url: Option<String>,
        token_kind: TokenKind,
    ) -> Result<Self, ConfigError> {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let raw_url = base_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let parsed = url::Url::parse(&raw_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: raw_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: raw_url,
                reason: "scheme must be http or https".to_string(),
            });
        }

        Ok(Self {
            token,
            base_url: raw_url.trim_end_matches('/').to_string(),
            token_kind,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token_kind(&self) -> TokenKind {
        self.token_kind
    }

    /// Value of the `X-Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_kind.label(), self.token)
    }
}

impl fmt::Debug for VrmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VrmConfig")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("token_kind", &self.token_kind)
            .finish()
    }
}
