//! Stream classification and accumulation for a single chat turn.
//!
//! A turn consumes the fragment stream of one completion, concatenates fragments
//! into a growing buffer and reports the buffer after every fragment. A terminal
//! failure replaces the buffer with the fixed text of its [`TurnError`].

use futures::StreamExt;
use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use tokio::sync::mpsc;

use crate::llm::chat::FragmentStream;
use crate::llm::{ CompletionFailure, FailureKind };

pub const CREDENTIAL_MISSING_MESSAGE: &str =
    "No API key is connected yet. Use \"Select API Key\" to connect a Gemini API key, then ask again.";
pub const CREDENTIAL_INVALID_MESSAGE: &str =
    "Error: Your API key was not found or is invalid. Please refresh the page and select a valid key from a paid GCP project.";
pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "The assistant is getting too many requests right now. Please wait a moment and try again.";
pub const TRANSIENT_MESSAGE: &str =
    "I'm having a bit of trouble connecting to the UNC servers. Please try again later! Go Heels!";
pub const EMPTY_RESPONSE_MESSAGE: &str =
    "I couldn't come up with an answer to that. Try rephrasing your question.";

/// Terminal turn failures. Each maps to exactly one user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnError {
    #[error("no credential available")]
    CredentialMissing,
    #[error("credential rejected by the completion source")]
    CredentialInvalid,
    #[error("completion quota exceeded")]
    QuotaExceeded,
    #[error("transient completion failure")]
    Transient,
    #[error("completion finished without any content")]
    EmptyResponse,
}

impl TurnError {
    pub fn user_message(&self) -> &'static str {
        match self {
            TurnError::CredentialMissing => CREDENTIAL_MISSING_MESSAGE,
            TurnError::CredentialInvalid => CREDENTIAL_INVALID_MESSAGE,
            TurnError::QuotaExceeded => QUOTA_EXCEEDED_MESSAGE,
            TurnError::Transient => TRANSIENT_MESSAGE,
            TurnError::EmptyResponse => EMPTY_RESPONSE_MESSAGE,
        }
    }
}

const CREDENTIAL_MARKERS: [&str; 4] = [
    "entity was not found",
    "not found",
    "permission",
    "api key not valid",
];
const QUOTA_MARKERS: [&str; 3] = ["quota", "rate limit", "resource_exhausted"];

/// Maps a completion failure onto the turn taxonomy: typed kind, then status code,
/// then message text. Anything unrecognised is `Transient`.
pub fn classify(failure: &CompletionFailure) -> TurnError {
    match failure.kind {
        FailureKind::Unauthenticated | FailureKind::PermissionDenied | FailureKind::NotFound => {
            return TurnError::CredentialInvalid;
        }
        FailureKind::RateLimited => {
            return TurnError::QuotaExceeded;
        }
        _ => {}
    }

    match failure.status {
        Some(401 | 403 | 404) => {
            return TurnError::CredentialInvalid;
        }
        Some(429) => {
            return TurnError::QuotaExceeded;
        }
        _ => {}
    }

    let message = failure.message.to_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|m| message.contains(m)) {
        TurnError::CredentialInvalid
    } else if QUOTA_MARKERS.iter().any(|m| message.contains(m)) {
        TurnError::QuotaExceeded
    } else {
        TurnError::Transient
    }
}

/// Observable progress of a turn. `Update` carries the whole buffer so far.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Update {
        content: String,
    },
    Completed {
        content: String,
    },
    Failed {
        error: TurnError,
        content: String,
    },
}

impl TurnEvent {
    pub fn failed(error: TurnError) -> Self {
        TurnEvent::Failed { error, content: error.user_message().to_string() }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Update { .. })
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, TurnEvent::Completed { .. })
    }

    pub fn content(&self) -> &str {
        match self {
            TurnEvent::Update { content } => content,
            TurnEvent::Completed { content } => content,
            TurnEvent::Failed { content, .. } => content,
        }
    }
}

/// Drains `fragments`, sending an `Update` after each one, and returns the terminal
/// event without sending it.
///
/// A dropped receiver does not stop consumption; the turn still runs to its natural
/// end so that its outcome is known.
pub async fn accumulate(mut fragments: FragmentStream, tx: &mpsc::Sender<TurnEvent>) -> TurnEvent {
    let mut buffer = String::new();
    let mut received = 0usize;

    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => {
                received += 1;
                buffer.push_str(&fragment);
                let _ = tx.send(TurnEvent::Update { content: buffer.clone() }).await;
            }
            Err(failure) => {
                let error = classify(&failure);
                warn!("Turn failed after {} fragment(s) as {:?}: {}", received, error, failure);
                return TurnEvent::failed(error);
            }
        }
    }

    if received == 0 {
        info!("Completion stream ended without fragments");
        return TurnEvent::failed(TurnError::EmptyResponse);
    }

    TurnEvent::Completed { content: buffer }
}
