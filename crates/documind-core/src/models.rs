//! Data models for DocuMind
//!
//! Wire types exchanged with the API and the two aggregates the sync core
//! owns: [`Conversation`] and [`Document`]. Aggregates are mutated only by
//! the reducer (see `sync::reducer`) and by the session's append of the
//! user's own question.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder title the server gives new conversations
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Auto-generated titles are cut to this many characters
pub const TITLE_MAX_CHARS: usize = 80;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A document passage the answer was grounded on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub document_id: String,
    pub document_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub chunk_text: String,
    #[serde(default)]
    pub relevance_score: f64,
}

/// Token accounting reported by the model
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt: u32,
    #[serde(default)]
    pub completion: u32,
    #[serde(default)]
    pub total: u32,
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique identifier
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Author
    pub role: Role,
    /// Text content (grows while an assistant message is in flight)
    pub content: String,
    /// Passages cited by the answer (empty until the answer is final)
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Model that produced the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Token usage for the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
    /// When this message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user question
    pub fn user(conversation_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self::new(conversation_id.into(), Role::User, question.into())
    }

    /// Create an empty assistant message, ready to receive streamed content
    pub fn assistant(conversation_id: impl Into<String>) -> Self {
        Self::new(conversation_id.into(), Role::Assistant, String::new())
    }

    fn new(conversation_id: String, role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role,
            content,
            sources: Vec::new(),
            model_used: None,
            tokens_used: None,
            created_at: Utc::now(),
        }
    }
}

/// Conversation aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    /// Unique identifier (server-assigned)
    pub id: String,
    /// Display title; `None` or the placeholder counts as "still default"
    #[serde(default)]
    pub title: Option<String>,
    /// When this conversation was created
    pub created_at: DateTime<Utc>,
    /// When this conversation was last updated
    pub updated_at: DateTime<Utc>,
    /// Messages in order
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Id of the assistant message still receiving content
    #[serde(skip)]
    pub(crate) in_flight: Option<String>,
    /// Last terminal failure, cleared on the next successful operation
    #[serde(skip)]
    pub(crate) sync_error: Option<String>,
}

impl Conversation {
    /// Create an empty conversation with the default title
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: Some(DEFAULT_CONVERSATION_TITLE.to_string()),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            in_flight: None,
            sync_error: None,
        }
    }

    /// Whether the title is still the server's placeholder
    pub fn title_is_default(&self) -> bool {
        match self.title.as_deref() {
            None => true,
            Some(title) => title.is_empty() || title == DEFAULT_CONVERSATION_TITLE,
        }
    }

    /// Title to show, falling back to the placeholder
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => DEFAULT_CONVERSATION_TITLE,
        }
    }

    /// The assistant message still receiving streamed content, if any
    pub fn in_flight_message(&self) -> Option<&Message> {
        let id = self.in_flight.as_deref()?;
        self.messages.iter().find(|m| m.id == id)
    }

    /// Whether an answer is currently streaming into this conversation
    pub fn is_answering(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Error from the last failed operation, if not yet cleared
    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    /// Most recent question asked by the user
    pub fn last_question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Append the user's question and clear any previous error
    pub(crate) fn push_question(&mut self, question: &str) -> Message {
        let message = Message::user(self.id.clone(), question);
        self.messages.push(message.clone());
        self.sync_error = None;
        self.updated_at = Utc::now();
        message
    }
}

/// Document processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Completed and failed never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Document aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier (server-assigned)
    pub id: String,
    /// Stored file name
    #[serde(default)]
    pub name: Option<String>,
    /// Processing status
    #[serde(default)]
    pub status: DocumentStatus,
    /// Processing progress, 0..=100
    #[serde(default, deserialize_with = "percent")]
    pub progress: u8,
    /// Pipeline step currently running
    #[serde(default)]
    pub current_step: String,
    /// Failure reported by the processing pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Number of chunks produced
    #[serde(default)]
    pub chunk_count: u32,
    /// Last transport failure, cleared on the next applied update
    #[serde(skip)]
    pub(crate) sync_error: Option<String>,
}

impl Document {
    /// Create a pending document
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            status: DocumentStatus::Pending,
            progress: 0,
            current_step: String::new(),
            error_message: None,
            chunk_count: 0,
            sync_error: None,
        }
    }

    /// Fill in progress for documents the server reports as already completed
    pub fn normalized(mut self) -> Self {
        if self.status == DocumentStatus::Completed {
            self.progress = 100;
        }
        self.progress = self.progress.min(100);
        self
    }

    /// Error from the last failed status stream, if not yet cleared
    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }
}

/// Accept integer or fractional percentages
fn percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_nan() {
        return Ok(0);
    }
    Ok(value.round().clamp(0.0, 100.0) as u8)
}

/// One frame of the document processing status stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingStatus {
    pub document_id: String,
    pub status: DocumentStatus,
    pub progress: f64,
    pub current_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProcessingStatus {
    /// Progress clamped to 0..=100
    pub fn progress_percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.round().clamp(0.0, 100.0) as u8
    }
}

/// Retrieval options for a question
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AskOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_filter: Option<Vec<String>>,
}

/// Body of an ask request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub options: AskOptions,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: AskOptions::default(),
        }
    }
}

/// Complete answer returned by the non-streaming ask call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    pub model_used: String,
    #[serde(default)]
    pub tokens_used: TokenUsage,
}

/// Response of the conversation list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    pub total: u64,
}

/// Response of the document list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<Document>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Response of the upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    pub name: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub message: String,
}

/// Service health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub services: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_default_title() {
        let mut conversation = Conversation::new("c1");
        assert!(conversation.title_is_default());

        conversation.title = None;
        assert!(conversation.title_is_default());
        assert_eq!(conversation.display_title(), DEFAULT_CONVERSATION_TITLE);

        conversation.title = Some("Quarterly report".to_string());
        assert!(!conversation.title_is_default());
    }

    #[test]
    fn test_push_question_clears_error() {
        let mut conversation = Conversation::new("c1");
        conversation.sync_error = Some("Stream connection lost".to_string());

        let message = conversation.push_question("What is the revenue?");

        assert_eq!(message.role, Role::User);
        assert_eq!(message.conversation_id, "c1");
        assert_eq!(conversation.messages.len(), 1);
        assert!(conversation.sync_error().is_none());
        assert_eq!(conversation.last_question(), Some("What is the revenue?"));
    }

    #[test]
    fn test_conversation_deserialize_from_server() {
        let json = r#"{
            "id": "8b1c",
            "title": null,
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z",
            "messages": [{
                "id": "m1",
                "conversation_id": "8b1c",
                "role": "assistant",
                "content": "Hi",
                "sources": [],
                "model_used": "gpt-4o",
                "tokens_used": {"prompt": 3, "completion": 1, "total": 4},
                "created_at": "2024-05-01T10:00:01Z"
            }]
        }"#;

        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert!(conversation.title_is_default());
        assert_eq!(conversation.messages[0].role, Role::Assistant);
        assert_eq!(conversation.messages[0].tokens_used.unwrap().total, 4);
        assert!(!conversation.is_answering());
    }

    #[test]
    fn test_document_status_terminal() {
        assert!(!DocumentStatus::Pending.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(DocumentStatus::Completed.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
        assert_eq!(DocumentStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_document_normalized() {
        let json = r#"{"id": "d1", "name": "report.pdf", "status": "completed", "chunk_count": 12}"#;
        let document: Document = serde_json::from_str(json).unwrap();
        assert_eq!(document.progress, 0);

        let document = document.normalized();
        assert_eq!(document.progress, 100);
        assert_eq!(document.chunk_count, 12);

        let json = r#"{"id": "d2", "status": "processing", "progress": 42.6}"#;
        let document: Document = serde_json::from_str(json).unwrap();
        assert_eq!(document.progress, 43);
    }

    #[test]
    fn test_processing_status_progress_clamped() {
        let mut status = ProcessingStatus {
            document_id: "d1".into(),
            status: DocumentStatus::Processing,
            progress: 140.0,
            current_step: "chunking".into(),
            error_message: None,
        };
        assert_eq!(status.progress_percent(), 100);

        status.progress = -3.0;
        assert_eq!(status.progress_percent(), 0);

        status.progress = 39.6;
        assert_eq!(status.progress_percent(), 40);
    }

    #[test]
    fn test_ask_request_serialization() {
        let request = AskRequest::new("What is DocuMind?");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["question"], "What is DocuMind?");
        assert_eq!(json["options"], serde_json::json!({}));
    }
}
