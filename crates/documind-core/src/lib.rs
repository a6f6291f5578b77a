//! DocuMind Core Library
//!
//! Client-side state synchronization for DocuMind, a document
//! question-answering service. Conversations and documents are kept as
//! local aggregates that streamed answers and processing updates are
//! applied to.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let api = Arc::new(ApiClient::new(&config)?);
//! let session = SyncSession::with_api(&config, api.clone())?;
//!
//! // Ask a question, watching the answer grow
//! let conversation = api.create_conversation(None).await?;
//! let mut view = session.track_conversation(conversation.clone());
//! let answer = session.ask(&conversation.id, "What is the refund policy?").await?;
//! ```
//!
//! # Modules
//!
//! - `sync`: Channels, frame decoding, reducer and the session (main entry point)
//! - `api`: REST client for the DocuMind API
//! - `models`: Conversations, messages, documents and wire types
//! - `config`: Application configuration
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod sync;

pub use api::{ApiClient, AskBackend};
pub use config::{ChatTransport, Config};
pub use error::{SyncError, SyncResult};
pub use models::{
    AskOptions, AskRequest, AskResponse, Conversation, Document, DocumentStatus, Message,
    ProcessingStatus, Role, Source, TokenUsage,
};
pub use sync::{Subscription, SyncSession};
