//! Transport channels
//!
//! One channel streams one resource: a conversation's answer or a
//! document's processing status. Opening a channel spawns a task that
//! connects, decodes every frame in arrival order and forwards the
//! resulting events. The returned [`ChannelHandle`] observes and controls
//! that task.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting ──► Open ──► Closed
//!      │           │
//!      └───────────┴────► Failed
//! ```
//!
//! Closed and Failed are terminal. A handle never reopens; open a new
//! channel for the same resource instead.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::frame::{self, DomainEvent};
use super::registry::ResourceId;
use super::transport::{ChannelKind, Connection, Connector, Endpoint, FrameSink};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};

/// Events buffered between the channel task and its consumer
const EVENT_BUFFER: usize = 64;

/// Process-unique channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Connecting to the endpoint
    Connecting,
    /// Receiving frames
    Open,
    /// Closed locally, or by the remote after the final event
    Closed,
    /// Stopped by an error
    Failed,
}

impl TransportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Failed)
    }
}

/// What a channel delivers to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection established
    Connected,
    /// A decoded frame, or the transport error that ended the channel
    Event(DomainEvent),
    /// The remote refused the request before streaming began
    Rejected(SyncError),
}

/// Channel timing
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    /// Longest allowed silence between frames
    pub keepalive: Duration,
    /// Longest allowed connect
    pub connect_timeout: Duration,
}

impl ChannelSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keepalive: config.keepalive(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug)]
enum ChannelCommand {
    Send(String),
    Close,
}

/// Handle to a channel task
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    resource: ResourceId,
    kind: ChannelKind,
    state: Arc<watch::Sender<TransportState>>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    /// Open a channel for a resource
    ///
    /// Spawns the channel task on the current tokio runtime and returns the
    /// handle together with the receiver of the channel's events.
    pub fn open(
        resource: ResourceId,
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        settings: ChannelSettings,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (handle, commands) = Self::detached(resource, endpoint.kind());
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let task = ChannelTask {
            id: handle.id,
            resource: handle.resource.clone(),
            kind: handle.kind,
            endpoint,
            connector,
            settings,
            state: Arc::clone(&handle.state),
            commands,
            events: event_tx,
        };
        tokio::spawn(task.run());

        (handle, event_rx)
    }

    /// Handle with no task behind it
    fn detached(
        resource: ResourceId,
        kind: ChannelKind,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelCommand>) {
        let (state_tx, _) = watch::channel(TransportState::Connecting);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ChannelId::next(),
            resource,
            kind,
            state: Arc::new(state_tx),
            commands: command_tx,
        };
        (handle, command_rx)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Current state
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Whether the channel is connecting or open
    pub fn is_live(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Send a frame on a duplex channel
    pub fn send(&self, payload: impl Into<String>) -> SyncResult<()> {
        if self.kind != ChannelKind::Duplex {
            return Err(SyncError::SendUnsupported);
        }
        if self.state() != TransportState::Open {
            return Err(SyncError::NotConnected);
        }
        self.commands
            .send(ChannelCommand::Send(payload.into()))
            .map_err(|_| SyncError::NotConnected)
    }

    /// Close the channel
    ///
    /// Idempotent. Returns true only for the call that performed the close.
    pub fn close(&self) -> bool {
        if !transition(&self.state, TransportState::Closed) {
            return false;
        }
        debug!(channel = %self.id, resource = %self.resource, "Closing channel");
        let _ = self.commands.send(ChannelCommand::Close);
        true
    }

    /// Wait until the channel reaches a terminal state
    pub async fn closed(&self) -> TransportState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }
}

/// Move to `next` unless already terminal
fn transition(state: &watch::Sender<TransportState>, next: TransportState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    })
}

struct ChannelTask {
    id: ChannelId,
    resource: ResourceId,
    kind: ChannelKind,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    settings: ChannelSettings,
    state: Arc<watch::Sender<TransportState>>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::Sender<ChannelEvent>,
}

impl ChannelTask {
    async fn run(mut self) {
        let Some(connection) = self.establish().await else {
            return;
        };

        if !transition(&self.state, TransportState::Open) {
            debug!(channel = %self.id, "Channel closed while connecting");
            return;
        }
        info!(channel = %self.id, resource = %self.resource, kind = %self.kind, "Channel open");

        if self.events.send(ChannelEvent::Connected).await.is_err() {
            transition(&self.state, TransportState::Closed);
            return;
        }

        self.pump(connection).await;
    }

    /// Connect, giving up on timeout or a close request
    async fn establish(&mut self) -> Option<Connection> {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let connect = tokio::time::timeout(self.settings.connect_timeout, async move {
            connector.connect(&endpoint).await
        });
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok(connection)) => Some(connection),
                        Ok(Err(err @ SyncError::Service { .. })) => {
                            if transition(&self.state, TransportState::Failed) {
                                warn!(channel = %self.id, resource = %self.resource, "Request rejected: {}", err);
                                let _ = self.events.send(ChannelEvent::Rejected(err)).await;
                            }
                            None
                        }
                        Ok(Err(err)) => {
                            self.fail(err.to_string()).await;
                            None
                        }
                        Err(_) => {
                            self.fail(format!(
                                "Timed out connecting to {} after {:?}",
                                self.endpoint.url(),
                                self.settings.connect_timeout
                            ))
                            .await;
                            None
                        }
                    };
                }
                cmd = self.commands.recv() => match cmd {
                    Some(ChannelCommand::Send(_)) => {
                        debug!(channel = %self.id, "Dropping frame queued before open");
                    }
                    Some(ChannelCommand::Close) | None => {
                        transition(&self.state, TransportState::Closed);
                        return None;
                    }
                },
            }
        }
    }

    /// Forward frames until the channel ends
    async fn pump(&mut self, connection: Connection) {
        let Connection { mut frames, mut sink } = connection;
        let keepalive = self.settings.keepalive;
        // Set once a done frame or terminal status has been forwarded
        let mut finished = false;

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(ChannelCommand::Send(text)) => {
                        let Some(sink) = sink.as_mut() else {
                            continue;
                        };
                        if let Err(e) = sink.send(text).await {
                            self.fail(e.to_string()).await;
                            return;
                        }
                    }
                    Some(ChannelCommand::Close) | None => {
                        shutdown(&mut sink).await;
                        transition(&self.state, TransportState::Closed);
                        debug!(channel = %self.id, "Channel closed");
                        return;
                    }
                },

                next = tokio::time::timeout(keepalive, frames.next()) => match next {
                    Err(_) => {
                        shutdown(&mut sink).await;
                        self.fail(format!("No frame received within {:?}", keepalive)).await;
                        return;
                    }
                    Ok(None) if finished => {
                        debug!(channel = %self.id, "Remote ended the stream");
                        transition(&self.state, TransportState::Closed);
                        return;
                    }
                    Ok(None) => {
                        self.fail("Stream ended before the final event".to_string()).await;
                        return;
                    }
                    Ok(Some(Err(e))) => {
                        self.fail(e.to_string()).await;
                        return;
                    }
                    Ok(Some(Ok(text))) => {
                        debug!(channel = %self.id, bytes = text.len(), "Frame received");
                        match frame::decode(self.resource.kind, &text) {
                            DomainEvent::TransportError(message) => {
                                shutdown(&mut sink).await;
                                self.fail(message).await;
                                return;
                            }
                            event => {
                                let done = matches!(event, DomainEvent::Done(_));
                                finished |= event.is_terminal();
                                if self.events.send(ChannelEvent::Event(event)).await.is_err() {
                                    shutdown(&mut sink).await;
                                    transition(&self.state, TransportState::Closed);
                                    return;
                                }
                                if done && self.kind == ChannelKind::PushStream {
                                    transition(&self.state, TransportState::Closed);
                                    debug!(channel = %self.id, "Stream complete");
                                    return;
                                }
                            }
                        }
                    }
                },
            }
        }
    }

    /// Mark the channel failed and emit its single transport error
    async fn fail(&mut self, message: String) {
        if transition(&self.state, TransportState::Failed) {
            warn!(channel = %self.id, resource = %self.resource, "Channel failed: {}", message);
            let _ = self
                .events
                .send(ChannelEvent::Event(DomainEvent::TransportError(message)))
                .await;
        }
    }
}

async fn shutdown(sink: &mut Option<FrameSink>) {
    if let Some(sink) = sink.as_mut() {
        sink.close().await.ok();
    }
}

#[cfg(test)]
pub(crate) fn detached_handle(resource: ResourceId, kind: ChannelKind) -> ChannelHandle {
    ChannelHandle::detached(resource, kind).0
}
