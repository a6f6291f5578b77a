//! Streaming sync core
//!
//! Keeps local conversation and document state in step with the DocuMind
//! API by applying streamed answer chunks and processing-status updates.
//!
//! ## Pipeline
//!
//! 1. A [`SyncSession`] opens a channel for a resource (event stream or socket)
//! 2. The channel task decodes each frame into a [`DomainEvent`]
//! 3. The reducer folds each event into the aggregate
//! 4. Observers see the new state through `watch` receivers
//!
//! ## Usage
//!
//! ```ignore
//! let session = SyncSession::connect(&config)?;
//! let conversation = session.track_conversation(api.get_conversation(id).await?);
//! let answer = session.ask(id, "What does section 4 cover?").await?;
//! ```

mod channel;
mod frame;
mod reducer;
mod registry;
mod session;
mod transport;

pub use channel::{ChannelEvent, ChannelHandle, ChannelId, ChannelSettings, TransportState};
pub use frame::{decode, decode_chat_frame, decode_status_frame, DomainEvent, DonePayload};
pub use reducer::{Applied, Reduce};
pub use registry::{ChannelRegistry, ResourceId, ResourceKind};
pub use session::{Subscription, SyncSession};
pub use transport::{
    ChannelKind, Connection, Connector, Endpoint, Endpoints, FrameSink, FrameStream,
    NetworkConnector, SseFrames,
};
