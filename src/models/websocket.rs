use serde::{ Serialize, Deserialize };

use crate::turn::{ TurnError, TurnEvent };

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "upload")] Upload {
        name: String,
        content: String,
    },
    #[serde(rename = "discard_document")]
    DiscardDocument,
    #[serde(rename = "select_credential")] SelectCredential {
        api_key: String,
    },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "delta")] Delta {
        content: String,
    },
    #[serde(rename = "response")] Response {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "error")] Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<TurnError>,
        message: String,
    },
    #[serde(rename = "document_loaded")] DocumentLoaded {
        name: String,
        message: String,
    },
    #[serde(rename = "document_cleared")]
    DocumentCleared,
    #[serde(rename = "credential_selected")]
    CredentialSelected,
    /// Analytics were reset; clients showing them must reload.
    #[serde(rename = "analytics_reset")]
    AnalyticsReset,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { kind: None, message: message.into() }
    }

    pub fn from_turn_event(event: TurnEvent, timestamp: i64) -> Self {
        match event {
            TurnEvent::Update { content } => ServerMessage::Delta { content },
            TurnEvent::Completed { content } => ServerMessage::Response { content, timestamp },
            TurnEvent::Failed { error, content } =>
                ServerMessage::Error { kind: Some(error), message: content },
        }
    }
}
