//! Scripted transports for driving a `SyncSession` without a network

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use documind_core::config::{ChatTransport, Config};
use documind_core::models::{AskRequest, AskResponse, TokenUsage};
use documind_core::sync::{Connection, Connector, Endpoint, FrameSink, SyncSession};
use documind_core::{AskBackend, SyncError, SyncResult};
use futures_util::{sink, stream};
use tokio::sync::mpsc;

/// What the next connection does
pub enum Script {
    /// Frames pushed through the paired sender; dropping it ends the stream
    Live(mpsc::UnboundedReceiver<String>),
    /// Connecting fails
    Fail(SyncError),
}

/// A live script and the sender feeding it
pub fn live() -> (mpsc::UnboundedSender<String>, Script) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Script::Live(rx))
}

/// Connector that replays scripts in order and records what it was asked for
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    endpoints: Mutex<Vec<Endpoint>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap().clone()
    }

    /// Frames written to duplex connections
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> SyncResult<Connection> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SyncError::Transport("no script left".into()))?;

        match script {
            Script::Fail(err) => Err(err),
            Script::Live(rx) => {
                let frames = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|frame| (Ok::<_, SyncError>(frame), rx))
                });
                let sink: Option<FrameSink> = match endpoint {
                    Endpoint::Socket { .. } => {
                        let sent = Arc::clone(&self.sent);
                        Some(Box::pin(sink::unfold(sent, |sent, frame: String| async move {
                            sent.lock().unwrap().push(frame);
                            Ok::<_, SyncError>(sent)
                        })))
                    }
                    Endpoint::EventStream { .. } => None,
                };
                Ok(Connection {
                    frames: Box::pin(frames),
                    sink,
                })
            }
        }
    }
}

/// Ask backend returning a canned result after a delay
pub struct MockBackend {
    result: SyncResult<AskResponse>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn answering(answer: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(AskResponse {
                answer: answer.to_string(),
                sources: Vec::new(),
                model_used: "gpt-x".to_string(),
                tokens_used: TokenUsage {
                    prompt: 10,
                    completion: 5,
                    total: 15,
                },
            }),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: SyncError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(err),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    /// Backend that must never be reached
    pub fn unused() -> Arc<Self> {
        Self::failing(SyncError::Transport("unexpected ask call".into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AskBackend for MockBackend {
    async fn ask(&self, _conversation_id: &str, _request: &AskRequest) -> SyncResult<AskResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}

/// Event-stream config; socket tests override the transport
pub fn test_config() -> Config {
    Config {
        api_url: "http://api.test".to_string(),
        chat_transport: ChatTransport::EventStream,
        keepalive_secs: 5,
        connect_timeout_secs: 5,
        ..Config::default()
    }
}

pub fn session(
    config: &Config,
    connector: Arc<ScriptedConnector>,
    backend: Arc<MockBackend>,
) -> Arc<SyncSession> {
    Arc::new(SyncSession::new(config, connector, backend))
}

pub const DONE_42: &str = r#"{"type":"done","answer":"The answer is 42.","sources":[],"model_used":"gpt-x","tokens_used":{"prompt":10,"completion":5,"total":15}}"#;

pub fn chunk(text: &str) -> String {
    serde_json::json!({ "type": "chunk", "content": text }).to_string()
}

pub fn status(document_id: &str, status: &str, progress: u32) -> String {
    serde_json::json!({
        "document_id": document_id,
        "status": status,
        "progress": progress,
        "current_step": "embedding",
    })
    .to_string()
}
