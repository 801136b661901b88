pub mod chat;

use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// One call to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system_instruction: String,
    pub temperature: f32,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unauthenticated,
    PermissionDenied,
    NotFound,
    RateLimited,
    Network,
    Timeout,
    Server,
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Unauthenticated => "unauthenticated",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::NotFound => "not_found",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Server => "server",
            FailureKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFailureKindError {
    message: String,
}

impl fmt::Display for ParseFailureKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseFailureKindError {}

/// Parses the provider's canonical status names (`PERMISSION_DENIED`, `RESOURCE_EXHAUSTED`, ...).
impl FromStr for FailureKind {
    type Err = ParseFailureKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNAUTHENTICATED" => Ok(FailureKind::Unauthenticated),
            "PERMISSION_DENIED" => Ok(FailureKind::PermissionDenied),
            "NOT_FOUND" => Ok(FailureKind::NotFound),
            "RESOURCE_EXHAUSTED" => Ok(FailureKind::RateLimited),
            "DEADLINE_EXCEEDED" => Ok(FailureKind::Timeout),
            "UNAVAILABLE" | "INTERNAL" => Ok(FailureKind::Server),
            _ =>
                Err(ParseFailureKindError {
                    message: format!("Unrecognised provider status: '{}'", s),
                }),
        }
    }
}

/// Failure raised by a completion source, before or during streaming.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} failure (status {status:?}): {message}")]
pub struct CompletionFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: ProviderError,
}

#[derive(Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl CompletionFailure {
    pub fn new(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self { kind, status, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, None, message)
    }

    /// Builds a failure from a non-success HTTP response.
    ///
    /// The provider's `error.status` field wins over the bare status code when it is
    /// recognised; the body's `error.message` becomes the diagnostic text.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ProviderErrorBody>(body).ok();
        let provider_kind = parsed
            .as_ref()
            .and_then(|b| b.error.status.as_deref())
            .and_then(|s| s.parse::<FailureKind>().ok());

        let kind = provider_kind.unwrap_or(match status {
            401 => FailureKind::Unauthenticated,
            403 => FailureKind::PermissionDenied,
            404 => FailureKind::NotFound,
            408 => FailureKind::Timeout,
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::Server,
            _ => FailureKind::Unknown,
        });

        let message = match parsed {
            Some(b) if !b.error.message.is_empty() => b.error.message,
            _ => body.trim().to_string(),
        };

        Self::new(kind, Some(status), message)
    }
}

impl From<reqwest::Error> for CompletionFailure {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        let kind = if err.is_timeout() { FailureKind::Timeout } else { FailureKind::Network };
        Self::new(kind, None, err.to_string())
    }
}
