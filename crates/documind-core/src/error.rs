//! Sync error handling
//!
//! Typed errors for the synchronization core. Variants carry owned strings
//! so a failure can be both recorded on an aggregate and returned to the
//! caller that triggered it.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur while syncing conversations and documents
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connection-level failure: refused, dropped, malformed status frame or keepalive expiry
    #[error("Transport error: {0}")]
    Transport(String),

    /// A second ask was attempted while one is still in flight
    #[error("A question is already being answered in conversation '{0}'")]
    ConflictingRequest(String),

    /// A frame could not be classified (recovered inline, never surfaced)
    #[error("Could not decode frame: {0}")]
    Decode(String),

    /// The remote service rejected the request before any streaming began
    #[error("Service error ({status}): {detail}")]
    Service { status: u16, detail: String },

    /// Outbound frame on a channel that is not open
    #[error("Channel is not connected")]
    NotConnected,

    /// Outbound frame on a push-stream channel
    #[error("Push-stream channels do not accept outbound frames")]
    SendUnsupported,

    /// The channel was closed before the request completed
    #[error("Request cancelled: channel closed before the answer completed")]
    Cancelled,

    /// Conversation has not been handed to the session
    #[error("Conversation '{0}' is not tracked by this session")]
    UnknownConversation(String),

    /// Document has not been handed to the session
    #[error("Document '{0}' is not tracked by this session")]
    UnknownDocument(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Create a transport error from anything displayable
    pub fn transport(error: impl std::fmt::Display) -> Self {
        SyncError::Transport(error.to_string())
    }

    /// Classify a reqwest error
    ///
    /// Errors that carry an HTTP status came from the service; everything
    /// else (DNS, refused, reset, timeout) is a transport failure.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => SyncError::Service {
                status: status.as_u16(),
                detail: error.to_string(),
            },
            None => SyncError::Transport(error.to_string()),
        }
    }

    /// Check if a caller could reasonably try the operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Cancelled | SyncError::ConflictingRequest(_) => {
                true
            }
            SyncError::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::Transport(_) => {
                Some("Check that the DocuMind API is running and reachable at the configured api_url.")
            }
            SyncError::ConflictingRequest(_) => {
                Some("Wait for the current answer to finish before asking another question.")
            }
            SyncError::Service { status, .. } if *status == 404 => {
                Some("The conversation or document no longer exists on the server.")
            }
            SyncError::Service { status, .. } if *status >= 500 => {
                Some("The server failed to process the request. Try again later.")
            }
            SyncError::Config(_) => Some("Run `documind config show` to inspect the configuration."),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for SyncError {
    fn from(error: tungstenite::Error) -> Self {
        SyncError::Transport(error.to_string())
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
