//! State reducer
//!
//! Folds decoded events into the conversation and document aggregates.
//! Each aggregate has exactly one consumer applying its events, so these
//! functions are plain synchronous mutations.

use chrono::Utc;
use tracing::debug;

use super::frame::{DomainEvent, DonePayload};
use crate::models::{Conversation, Document, DocumentStatus, Message, TITLE_MAX_CHARS};

/// Outcome of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The event did not concern this aggregate or was stale
    Unchanged,
    /// The aggregate changed
    Updated,
    /// An assistant message was finalized
    Finalized(Message),
    /// A transport failure was recorded
    Failed(String),
}

/// Apply domain events to an aggregate
pub trait Reduce {
    fn apply(&mut self, event: &DomainEvent) -> Applied;
}

impl Reduce for Conversation {
    fn apply(&mut self, event: &DomainEvent) -> Applied {
        match event {
            DomainEvent::Chunk(text) => {
                let message = self.in_flight_mut();
                message.content.push_str(text);
                self.updated_at = Utc::now();
                Applied::Updated
            }
            DomainEvent::Done(payload) => Applied::Finalized(self.finalize(payload.as_ref())),
            DomainEvent::TransportError(message) => {
                self.record_failure(message);
                Applied::Failed(message.clone())
            }
            DomainEvent::StatusUpdate(_) => Applied::Unchanged,
        }
    }
}

impl Conversation {
    /// The in-flight assistant message, created on demand
    fn in_flight_mut(&mut self) -> &mut Message {
        let existing = self
            .in_flight
            .as_deref()
            .and_then(|id| self.messages.iter().position(|m| m.id == id));

        let index = match existing {
            Some(index) => index,
            None => {
                let message = Message::assistant(self.id.clone());
                self.in_flight = Some(message.id.clone());
                self.messages.push(message);
                self.messages.len() - 1
            }
        };
        &mut self.messages[index]
    }

    fn finalize(&mut self, payload: Option<&DonePayload>) -> Message {
        let message = self.in_flight_mut();

        if let Some(payload) = payload {
            if let Some(answer) = payload.answer.as_deref() {
                if message.content != answer {
                    message.content = answer.to_string();
                }
            }
            message.sources = payload.sources.clone();
            if payload.model_used.is_some() {
                message.model_used = payload.model_used.clone();
            }
            if payload.tokens_used.is_some() {
                message.tokens_used = payload.tokens_used;
            }
        }
        let finalized = message.clone();

        self.in_flight = None;
        self.sync_error = None;
        self.updated_at = Utc::now();

        if self.title_is_default() {
            if let Some(question) = self.last_question() {
                let title: String = question.chars().take(TITLE_MAX_CHARS).collect();
                debug!(conversation = %self.id, "Titling conversation from question");
                self.title = Some(title);
            }
        }

        finalized
    }

    /// Record a terminal failure, keeping any partial answer
    pub(crate) fn record_failure(&mut self, error: &str) {
        self.in_flight = None;
        self.sync_error = Some(error.to_string());
    }
}

impl Reduce for Document {
    fn apply(&mut self, event: &DomainEvent) -> Applied {
        match event {
            DomainEvent::StatusUpdate(status) => {
                if status.document_id != self.id {
                    return Applied::Unchanged;
                }

                let progress = match status.status {
                    DocumentStatus::Completed => 100,
                    _ => status.progress_percent(),
                };

                if self.status.is_terminal()
                    && !(status.status.is_terminal() && progress >= self.progress)
                {
                    debug!(
                        document = %self.id,
                        current = %self.status,
                        incoming = %status.status,
                        "Ignoring stale status update"
                    );
                    return Applied::Unchanged;
                }

                self.status = status.status;
                self.progress = progress;
                self.current_step = status.current_step.clone();
                self.error_message = status.error_message.clone();
                self.sync_error = None;
                Applied::Updated
            }
            DomainEvent::TransportError(message) => {
                self.record_failure(message);
                Applied::Failed(message.clone())
            }
            DomainEvent::Chunk(_) | DomainEvent::Done(_) => Applied::Unchanged,
        }
    }
}

impl Document {
    pub(crate) fn record_failure(&mut self, error: &str) {
        self.sync_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessingStatus, Role, TokenUsage};
    use crate::sync::frame::decode_chat_frame;

    fn in_flight_count(conversation: &Conversation) -> usize {
        conversation
            .messages
            .iter()
            .filter(|m| Some(&m.id) == conversation.in_flight.as_ref())
            .count()
    }

    fn status(id: &str, status: DocumentStatus, progress: f64) -> DomainEvent {
        DomainEvent::StatusUpdate(ProcessingStatus {
            document_id: id.to_string(),
            status,
            progress,
            current_step: "step".to_string(),
            error_message: None,
        })
    }

    #[test]
    fn test_chunks_then_done_payload_is_authoritative() {
        let mut conversation = Conversation::new("c1");
        conversation.push_question("What is the answer?");

        for raw in [
            r#"{"type":"chunk","content":"The "}"#,
            r#"{"type":"chunk","content":"answer is 42."}"#,
        ] {
            assert_eq!(conversation.apply(&decode_chat_frame(raw)), Applied::Updated);
            assert!(in_flight_count(&conversation) <= 1);
        }
        assert_eq!(
            conversation.in_flight_message().unwrap().content,
            "The answer is 42."
        );

        let done = decode_chat_frame(
            r#"{"type":"done","answer":"The answer is 42.","sources":[],"model_used":"gpt-x","tokens_used":{"prompt":10,"completion":5,"total":15}}"#,
        );
        let message = match conversation.apply(&done) {
            Applied::Finalized(message) => message,
            other => panic!("Expected Finalized, got {:?}", other),
        };

        assert_eq!(message.content, "The answer is 42.");
        assert_eq!(message.tokens_used.unwrap().total, 15);
        assert_eq!(message.model_used.as_deref(), Some("gpt-x"));
        assert!(!conversation.is_answering());
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1], message);
    }

    #[test]
    fn test_done_answer_replaces_divergent_chunks() {
        let mut conversation = Conversation::new("c1");
        conversation.push_question("q");
        conversation.apply(&DomainEvent::Chunk("garbled".into()));

        let done = DomainEvent::Done(Some(DonePayload {
            answer: Some("clean".into()),
            ..Default::default()
        }));
        conversation.apply(&done);

        assert_eq!(conversation.messages[1].content, "clean");
    }

    #[test]
    fn test_bare_done_keeps_accumulated_text() {
        let mut conversation = Conversation::new("c1");
        conversation.push_question("q");
        conversation.apply(&DomainEvent::Chunk("partial".into()));
        conversation.apply(&DomainEvent::Done(None));

        assert_eq!(conversation.messages[1].content, "partial");
        assert!(conversation.messages[1].sources.is_empty());
    }

    #[test]
    fn test_done_without_chunks_creates_message() {
        let mut conversation = Conversation::new("c1");
        conversation.push_question("q");
        let done = DomainEvent::Done(Some(DonePayload {
            answer: Some("direct".into()),
            tokens_used: Some(TokenUsage {
                prompt: 1,
                completion: 1,
                total: 2,
            }),
            ..Default::default()
        }));

        assert!(matches!(conversation.apply(&done), Applied::Finalized(_)));
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].role, Role::Assistant);
        assert_eq!(conversation.messages[1].content, "direct");
    }

    #[test]
    fn test_literal_frame_appended_as_text() {
        let mut conversation = Conversation::new("c1");
        conversation.apply(&decode_chat_frame("oops"));

        assert_eq!(conversation.in_flight_message().unwrap().content, "oops");
        assert!(conversation.sync_error().is_none());
    }

    #[test]
    fn test_title_derived_from_question() {
        let mut conversation = Conversation::new("c1");
        let question = "é".repeat(100);
        conversation.push_question(&question);
        conversation.apply(&DomainEvent::Done(None));

        let title = conversation.title.as_deref().unwrap();
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
        assert!(!conversation.title_is_default());
    }

    #[test]
    fn test_custom_title_kept() {
        let mut conversation = Conversation::new("c1");
        conversation.title = Some("Quarterly report".into());
        conversation.push_question("What changed?");
        conversation.apply(&DomainEvent::Done(None));

        assert_eq!(conversation.title.as_deref(), Some("Quarterly report"));
    }

    #[test]
    fn test_transport_error_keeps_partial_content() {
        let mut conversation = Conversation::new("c1");
        conversation.push_question("q");
        conversation.apply(&DomainEvent::Chunk("half an ans".into()));

        let applied = conversation.apply(&DomainEvent::TransportError("reset".into()));

        assert_eq!(applied, Applied::Failed("reset".into()));
        assert_eq!(conversation.messages[1].content, "half an ans");
        assert_eq!(conversation.sync_error(), Some("reset"));
        assert!(!conversation.is_answering());

        // The next question clears the error
        conversation.push_question("again");
        assert!(conversation.sync_error().is_none());
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut document = Document::new("d1");

        assert_eq!(
            document.apply(&status("d1", DocumentStatus::Processing, 40.0)),
            Applied::Updated
        );
        assert_eq!(document.progress, 40);

        document.apply(&status("d1", DocumentStatus::Completed, 100.0));
        assert_eq!(document.status, DocumentStatus::Completed);

        assert_eq!(
            document.apply(&status("d1", DocumentStatus::Processing, 60.0)),
            Applied::Unchanged
        );
        assert_eq!(document.status, DocumentStatus::Completed);
        assert_eq!(document.progress, 100);
    }

    #[test]
    fn test_terminal_to_terminal_needs_progress() {
        let mut document = Document::new("d1");
        document.apply(&status("d1", DocumentStatus::Failed, 30.0));

        assert_eq!(
            document.apply(&status("d1", DocumentStatus::Failed, 10.0)),
            Applied::Unchanged
        );
        assert_eq!(document.progress, 30);

        assert_eq!(
            document.apply(&status("d1", DocumentStatus::Completed, 100.0)),
            Applied::Updated
        );
        assert_eq!(document.status, DocumentStatus::Completed);
    }

    #[test]
    fn test_non_terminal_regression_applies() {
        let mut document = Document::new("d1");
        document.apply(&status("d1", DocumentStatus::Processing, 60.0));
        document.apply(&status("d1", DocumentStatus::Processing, 20.0));
        assert_eq!(document.progress, 20);
    }

    #[test]
    fn test_status_for_other_document_ignored() {
        let mut document = Document::new("d1");
        assert_eq!(
            document.apply(&status("d2", DocumentStatus::Completed, 100.0)),
            Applied::Unchanged
        );
        assert_eq!(document.status, DocumentStatus::Pending);
    }

    #[test]
    fn test_document_transport_error() {
        let mut document = Document::new("d1");
        document.apply(&status("d1", DocumentStatus::Processing, 10.0));
        document.apply(&DomainEvent::TransportError("dropped".into()));

        assert_eq!(document.sync_error(), Some("dropped"));
        assert_eq!(document.status, DocumentStatus::Processing);
        assert_eq!(document.progress, 10);

        document.apply(&status("d1", DocumentStatus::Processing, 20.0));
        assert!(document.sync_error().is_none());
    }
}
