//! Sync session
//!
//! Owns the conversation and document aggregates and the channel registry,
//! and drives the requests whose results stream back over channels.
//!
//! Observers get `watch::Receiver`s and never mutate aggregates directly.
//! Each aggregate's events are applied by one consumer at a time: the `ask`
//! future for a conversation, the subscription task for a document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::OptionFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{ChannelEvent, ChannelHandle, ChannelId, ChannelSettings, TransportState};
use super::frame::DomainEvent;
use super::reducer::{Applied, Reduce};
use super::registry::{ChannelRegistry, ResourceId};
use super::transport::{Connector, Endpoints, NetworkConnector};
use crate::api::{ApiClient, AskBackend};
use crate::config::{ChatTransport, Config};
use crate::error::{SyncError, SyncResult};
use crate::models::{AskRequest, Conversation, Document, Message};

type Aggregates<T> = Mutex<HashMap<String, Arc<watch::Sender<T>>>>;

/// Synchronization core for one client session
pub struct SyncSession {
    settings: ChannelSettings,
    endpoints: Endpoints,
    chat_transport: ChatTransport,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn AskBackend>,
    registry: Arc<Mutex<ChannelRegistry>>,
    conversations: Aggregates<Conversation>,
    documents: Aggregates<Document>,
}

impl SyncSession {
    /// Create a session with explicit collaborators
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn AskBackend>,
    ) -> Self {
        Self {
            settings: ChannelSettings::from_config(config),
            endpoints: Endpoints::new(config),
            chat_transport: config.chat_transport,
            connector,
            backend,
            registry: Arc::new(Mutex::new(ChannelRegistry::new())),
            conversations: Mutex::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session that talks to the configured service
    pub fn connect(config: &Config) -> SyncResult<Self> {
        let api = Arc::new(ApiClient::new(config)?);
        Self::with_api(config, api)
    }

    /// Create a session sharing an existing API client
    pub fn with_api(config: &Config, api: Arc<ApiClient>) -> SyncResult<Self> {
        let connector = Arc::new(NetworkConnector::new(config)?);
        Ok(Self::new(config, connector, api))
    }

    /// Take ownership of a conversation fetched from the service
    ///
    /// A conversation with an answer in flight keeps its local state.
    pub fn track_conversation(&self, conversation: Conversation) -> watch::Receiver<Conversation> {
        let answering = lock(&self.registry).contains(&ResourceId::conversation(&conversation.id));
        let mut conversations = lock(&self.conversations);

        match conversations.get(&conversation.id) {
            Some(state) => {
                if answering {
                    debug!(conversation = %conversation.id, "Keeping local state while answering");
                } else {
                    state.send_replace(conversation);
                }
                state.subscribe()
            }
            None => {
                let id = conversation.id.clone();
                let (tx, rx) = watch::channel(conversation);
                conversations.insert(id, Arc::new(tx));
                rx
            }
        }
    }

    /// Take ownership of a document fetched from the service
    pub fn track_document(&self, document: Document) -> watch::Receiver<Document> {
        let document = document.normalized();
        let mut documents = lock(&self.documents);

        match documents.get(&document.id) {
            Some(state) => {
                state.send_replace(document);
                state.subscribe()
            }
            None => {
                let id = document.id.clone();
                let (tx, rx) = watch::channel(document);
                documents.insert(id, Arc::new(tx));
                rx
            }
        }
    }

    /// Observe a tracked conversation
    pub fn conversation(&self, id: &str) -> Option<watch::Receiver<Conversation>> {
        lock(&self.conversations).get(id).map(|state| state.subscribe())
    }

    /// Observe a tracked document
    pub fn document(&self, id: &str) -> Option<watch::Receiver<Document>> {
        lock(&self.documents).get(id).map(|state| state.subscribe())
    }

    /// Stop tracking a conversation and close its channel
    pub fn forget_conversation(&self, id: &str) -> bool {
        lock(&self.registry).unregister(&ResourceId::conversation(id));
        lock(&self.conversations).remove(id).is_some()
    }

    /// Stop tracking a document and close its channel
    pub fn forget_document(&self, id: &str) -> bool {
        lock(&self.registry).unregister(&ResourceId::document(id));
        lock(&self.documents).remove(id).is_some()
    }

    /// Ask a question in a tracked conversation
    ///
    /// The question is appended to the conversation before any network
    /// activity. Streamed chunks grow the in-flight answer until the final
    /// answer arrives, which is returned. On failure the partial answer is
    /// kept and the error is recorded on the conversation.
    ///
    /// Only one question may be in flight per conversation; a concurrent
    /// call fails with [`SyncError::ConflictingRequest`] without touching
    /// the conversation.
    pub async fn ask(&self, conversation_id: &str, question: &str) -> SyncResult<Message> {
        let state = lookup(&self.conversations, conversation_id)
            .ok_or_else(|| SyncError::UnknownConversation(conversation_id.to_string()))?;
        let resource = ResourceId::conversation(conversation_id);
        let request = AskRequest::new(question);
        let endpoint = match self.chat_transport {
            ChatTransport::EventStream => self.endpoints.chat_stream(conversation_id, &request),
            ChatTransport::Socket => self.endpoints.chat_socket(conversation_id),
        };

        let (channel, events) = {
            let mut registry = lock(&self.registry);
            if registry.contains(&resource) {
                return Err(SyncError::ConflictingRequest(conversation_id.to_string()));
            }

            state.send_modify(|conversation| {
                conversation.push_question(question);
            });

            let (channel, events) = ChannelHandle::open(
                resource.clone(),
                endpoint,
                Arc::clone(&self.connector),
                self.settings,
            );
            registry.register(channel.clone());
            (channel, events)
        };

        info!(
            conversation = %conversation_id,
            channel = %channel.id(),
            transport = %self.chat_transport,
            "Asking question"
        );

        let mut guard = AskGuard {
            registry: &self.registry,
            resource,
            channel: channel.id(),
            state: Arc::clone(&state),
            settled: false,
        };

        let result = self.drive_answer(conversation_id, request, &state, events).await;
        guard.settled = true;

        match &result {
            Ok(message) => info!(
                conversation = %conversation_id,
                chars = message.content.chars().count(),
                "Answer complete"
            ),
            Err(e) => {
                warn!(conversation = %conversation_id, "Ask failed: {}", e);
                let error = e.to_string();
                state.send_modify(|conversation| conversation.record_failure(&error));
            }
        }

        result
    }

    async fn drive_answer(
        &self,
        conversation_id: &str,
        request: AskRequest,
        state: &watch::Sender<Conversation>,
        mut events: mpsc::Receiver<ChannelEvent>,
    ) -> SyncResult<Message> {
        // Socket streams carry no request of their own; the answer is
        // triggered by the plain ask call once the socket is open.
        let trigger = match self.chat_transport {
            ChatTransport::Socket => {
                let backend = Arc::clone(&self.backend);
                let id = conversation_id.to_string();
                Some(async move { backend.ask(&id, &request).await })
            }
            ChatTransport::EventStream => None,
        };
        let mut trigger_done = trigger.is_none();
        let mut connected = false;
        let trigger = OptionFuture::from(trigger);
        tokio::pin!(trigger);

        loop {
            tokio::select! {
                response = &mut trigger, if connected && !trigger_done => {
                    trigger_done = true;
                    match response {
                        Some(Ok(response)) => {
                            debug!(conversation = %conversation_id, "Applying answer from ask response");
                            let event = DomainEvent::Done(Some(response.into()));
                            if let Some(message) = apply_to_conversation(state, &event)? {
                                return Ok(message);
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {}
                    }
                }
                event = events.recv() => match event {
                    Some(ChannelEvent::Connected) => connected = true,
                    Some(ChannelEvent::Rejected(e)) => return Err(e),
                    Some(ChannelEvent::Event(event)) => {
                        if let Some(message) = apply_to_conversation(state, &event)? {
                            return Ok(message);
                        }
                    }
                    // Channels that end on their own emit an error first
                    None => return Err(SyncError::Cancelled),
                },
            }
        }
    }

    /// Follow a document's processing status
    ///
    /// Opens the status channel, replacing any channel already watching the
    /// document, and spawns the task that applies its updates. The
    /// subscription ends by itself once the document reaches a terminal
    /// status or the channel fails. Must be called within a tokio runtime.
    pub fn watch_document(&self, document_id: &str) -> SyncResult<Subscription> {
        let state = lookup(&self.documents, document_id)
            .ok_or_else(|| SyncError::UnknownDocument(document_id.to_string()))?;
        let resource = ResourceId::document(document_id);

        let (channel, events) = ChannelHandle::open(
            resource,
            self.endpoints.document_status(document_id),
            Arc::clone(&self.connector),
            self.settings,
        );
        if let Some(replaced) = lock(&self.registry).register(channel.clone()) {
            debug!(document = %document_id, %replaced, "Status subscription replaced");
        }
        info!(document = %document_id, channel = %channel.id(), "Watching document");

        let document = state.subscribe();
        let task = tokio::spawn(follow_document(
            state,
            events,
            Arc::clone(&self.registry),
            channel.clone(),
        ));

        Ok(Subscription {
            channel,
            registry: Arc::clone(&self.registry),
            document,
            task,
        })
    }

    /// Close every channel
    ///
    /// In-flight asks settle with [`SyncError::Cancelled`]. Returns the number
    /// of channels closed.
    pub fn close_all(&self) -> usize {
        let count = lock(&self.registry).close_all();
        if count > 0 {
            info!(count, "Closed all channels");
        }
        count
    }

    /// Number of registered channels
    pub fn channel_count(&self) -> usize {
        lock(&self.registry).len()
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Handle to a document status subscription
#[derive(Debug)]
pub struct Subscription {
    channel: ChannelHandle,
    registry: Arc<Mutex<ChannelRegistry>>,
    document: watch::Receiver<Document>,
    task: JoinHandle<Document>,
}

impl Subscription {
    /// Observe the document
    pub fn document(&self) -> watch::Receiver<Document> {
        self.document.clone()
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    /// State of the underlying channel
    pub fn state(&self) -> TransportState {
        self.channel.state()
    }

    /// Tear down the channel this subscription opened
    ///
    /// A channel that has since been replaced by a newer subscription is
    /// left alone.
    pub fn cancel(&self) {
        lock(&self.registry).unregister_channel(self.channel.resource(), self.channel.id());
        self.channel.close();
    }

    /// Wait for the subscription to end and return the final document
    pub async fn finished(self) -> SyncResult<Document> {
        self.task.await.map_err(|_| SyncError::Cancelled)
    }
}

/// Releases an ask's channel when the ask settles or is dropped
struct AskGuard<'a> {
    registry: &'a Mutex<ChannelRegistry>,
    resource: ResourceId,
    channel: ChannelId,
    state: Arc<watch::Sender<Conversation>>,
    settled: bool,
}

impl Drop for AskGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let error = SyncError::Cancelled.to_string();
            self.state
                .send_modify(|conversation| conversation.record_failure(&error));
        }
        lock(self.registry).unregister_channel(&self.resource, self.channel);
    }
}

async fn follow_document(
    state: Arc<watch::Sender<Document>>,
    mut events: mpsc::Receiver<ChannelEvent>,
    registry: Arc<Mutex<ChannelRegistry>>,
    channel: ChannelHandle,
) -> Document {
    let already_terminal = state.borrow().status.is_terminal();

    // A replaced or cancelled channel must not apply what it still has buffered
    let owned = || lock(&registry).holds(channel.resource(), channel.id());

    if !already_terminal {
        loop {
            let Some(event) = events.recv().await else {
                if owned() && !state.borrow().status.is_terminal() {
                    warn!(channel = %channel.id(), "Status stream ended early");
                    state.send_modify(|document| {
                        document.record_failure("Status stream ended before processing finished")
                    });
                }
                break;
            };
            if !owned() {
                debug!(channel = %channel.id(), "Status channel no longer registered");
                break;
            }

            match event {
                ChannelEvent::Connected => {
                    debug!(channel = %channel.id(), "Status channel connected");
                }
                ChannelEvent::Rejected(e) => {
                    let error = e.to_string();
                    state.send_modify(|document| document.record_failure(&error));
                    break;
                }
                ChannelEvent::Event(event) => {
                    let applied = apply_to_document(&state, &event);
                    let terminal = state.borrow().status.is_terminal();
                    let failed = matches!(applied, Applied::Failed(_));
                    if terminal || failed || matches!(event, DomainEvent::Done(_)) {
                        break;
                    }
                }
            }
        }
    }

    lock(&registry).unregister_channel(channel.resource(), channel.id());
    channel.close();

    let document = state.borrow().clone();
    debug!(document = %document.id, status = %document.status, "Subscription finished");
    document
}

/// Apply an event, reporting a finalized message or a recorded failure
fn apply_to_conversation(
    state: &watch::Sender<Conversation>,
    event: &DomainEvent,
) -> SyncResult<Option<Message>> {
    let mut applied = Applied::Unchanged;
    state.send_if_modified(|conversation| {
        applied = conversation.apply(event);
        applied != Applied::Unchanged
    });

    match applied {
        Applied::Finalized(message) => Ok(Some(message)),
        Applied::Failed(message) => Err(SyncError::Transport(message)),
        Applied::Updated | Applied::Unchanged => Ok(None),
    }
}

fn apply_to_document(state: &watch::Sender<Document>, event: &DomainEvent) -> Applied {
    let mut applied = Applied::Unchanged;
    state.send_if_modified(|document| {
        applied = document.apply(event);
        applied != Applied::Unchanged
    });
    applied
}

fn lookup<T>(aggregates: &Aggregates<T>, id: &str) -> Option<Arc<watch::Sender<T>>> {
    lock(aggregates).get(id).cloned()
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
