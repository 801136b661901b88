use chrono::{ DateTime, Utc };
use log::debug;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use uuid::Uuid;

use crate::config::prompt::{ document_loaded_message, PromptConfig };
use crate::turn::TurnEvent;
use crate::upload::ContextDocument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("a response is still streaming")]
    TurnInProgress,
}

/// One conversation: ordered messages, the active context document and the turn state.
///
/// Messages are append-only; the assistant reply of the current turn is the only
/// one that changes, and only while its turn is streaming.
#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    messages: Vec<Message>,
    document: Option<ContextDocument>,
    state: TurnState,
    /// Index of the assistant message the current turn writes into.
    reply_index: Option<usize>,
}

impl ChatSession {
    pub fn new(greeting: &str) -> Self {
        let mut messages = Vec::new();
        if !greeting.is_empty() {
            messages.push(Message::new(Role::Assistant, greeting));
        }
        Self {
            id: Uuid::new_v4(),
            messages,
            document: None,
            state: TurnState::Idle,
            reply_index: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == TurnState::Streaming
    }

    pub fn document(&self) -> Option<&ContextDocument> {
        self.document.as_ref()
    }

    /// Appends the user message and an empty assistant placeholder, entering `Streaming`.
    pub fn begin_turn(&mut self, prompt_text: &str) -> Result<(), SessionError> {
        if self.is_streaming() {
            return Err(SessionError::TurnInProgress);
        }
        if prompt_text.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        self.messages.push(Message::new(Role::User, prompt_text));
        self.messages.push(Message::new(Role::Assistant, String::new()));
        self.reply_index = Some(self.messages.len() - 1);
        self.state = TurnState::Streaming;
        Ok(())
    }

    pub fn apply(&mut self, event: &TurnEvent) {
        if !self.is_streaming() {
            debug!("Ignoring turn event outside of a streaming turn");
            return;
        }
        if let Some(reply) = self.reply_index.and_then(|i| self.messages.get_mut(i)) {
            reply.content = event.content().to_string();
        }
        match event {
            TurnEvent::Update { .. } => {}
            TurnEvent::Completed { .. } => {
                self.state = TurnState::Completed;
                self.reply_index = None;
            }
            TurnEvent::Failed { .. } => {
                self.state = TurnState::Failed;
                self.reply_index = None;
            }
        }
    }

    /// Replaces any active document and posts the acknowledgement message.
    pub fn attach_document(&mut self, config: &PromptConfig, document: ContextDocument) -> &Message {
        let ack = document_loaded_message(config, &document.name);
        self.document = Some(document);
        self.messages.push(Message::new(Role::Assistant, ack));
        &self.messages[self.messages.len() - 1]
    }

    pub fn discard_document(&mut self) -> Option<ContextDocument> {
        self.document.take()
    }
}
