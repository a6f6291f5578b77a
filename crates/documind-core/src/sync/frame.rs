//! Frame decoding
//!
//! Turns the JSON text frames pushed by the API into typed domain events.
//!
//! Chat frames favor availability: anything that does not parse as a known
//! frame is kept as literal answer text. Status frames favor correctness: a
//! malformed frame becomes a transport error and never touches the document.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::registry::ResourceKind;
use crate::error::SyncError;
use crate::models::{AskResponse, ProcessingStatus, Source, TokenUsage};

/// Event decoded from one frame
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// Partial answer text
    Chunk(String),
    /// Stream finished; chat streams carry the complete answer
    Done(Option<DonePayload>),
    /// Document processing progress
    StatusUpdate(ProcessingStatus),
    /// Connection or protocol failure
    TransportError(String),
}

impl DomainEvent {
    /// Whether no further events are expected after this one
    pub fn is_terminal(&self) -> bool {
        match self {
            DomainEvent::Done(_) | DomainEvent::TransportError(_) => true,
            DomainEvent::StatusUpdate(status) => status.status.is_terminal(),
            DomainEvent::Chunk(_) => false,
        }
    }
}

/// Final answer carried by a `done` frame
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DonePayload {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<TokenUsage>,
}

impl DonePayload {
    fn is_empty(&self) -> bool {
        self.answer.is_none()
            && self.sources.is_empty()
            && self.model_used.is_none()
            && self.tokens_used.is_none()
    }
}

impl From<AskResponse> for DonePayload {
    fn from(response: AskResponse) -> Self {
        Self {
            answer: Some(response.answer),
            sources: response.sources,
            model_used: Some(response.model_used),
            tokens_used: Some(response.tokens_used),
        }
    }
}

/// Frames on a chat channel
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ChatFrame {
    Chunk {
        #[serde(default)]
        content: String,
    },
    Done {
        #[serde(flatten)]
        payload: DonePayload,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
}

/// Decode a frame for a resource of the given kind
pub fn decode(kind: ResourceKind, raw: &str) -> DomainEvent {
    match kind {
        ResourceKind::Conversation => decode_chat_frame(raw),
        ResourceKind::Document => decode_status_frame(raw),
    }
}

/// Decode a chat frame, falling back to literal text
pub fn decode_chat_frame(raw: &str) -> DomainEvent {
    match serde_json::from_str::<ChatFrame>(raw) {
        Ok(ChatFrame::Chunk { content }) => DomainEvent::Chunk(content),
        Ok(ChatFrame::Done { payload }) => {
            if payload.is_empty() {
                DomainEvent::Done(None)
            } else {
                DomainEvent::Done(Some(payload))
            }
        }
        Ok(ChatFrame::Error { message, detail }) => DomainEvent::TransportError(
            message
                .or(detail)
                .unwrap_or_else(|| "Server reported a stream error".to_string()),
        ),
        Err(e) => {
            let error = SyncError::Decode(e.to_string());
            debug!("Chat frame kept as text ({}): {:.60}", error, raw);
            DomainEvent::Chunk(raw.to_string())
        }
    }
}

/// Decode a document status frame
pub fn decode_status_frame(raw: &str) -> DomainEvent {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return DomainEvent::TransportError(format!("Malformed status frame: {}", e)),
    };

    match value.get("type").and_then(Value::as_str) {
        Some("done") => return DomainEvent::Done(None),
        Some("error") => {
            let message = value
                .get("message")
                .or_else(|| value.get("detail"))
                .and_then(Value::as_str)
                .unwrap_or("Server reported a stream error");
            return DomainEvent::TransportError(message.to_string());
        }
        _ => {}
    }

    match serde_json::from_value::<ProcessingStatus>(value) {
        Ok(status) => DomainEvent::StatusUpdate(status),
        Err(e) => DomainEvent::TransportError(format!("Malformed status frame: {}", e)),
    }
}
