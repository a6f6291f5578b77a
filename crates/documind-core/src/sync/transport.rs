//! Transports
//!
//! A [`Connector`] turns an [`Endpoint`] into a [`Connection`]: an ordered
//! stream of text frames plus, for duplex channels, a sink for outbound
//! frames. The network implementation speaks WebSocket (tokio-tungstenite)
//! and server-sent events (reqwest byte stream). Tests plug in their own
//! connector.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::{future, stream, Sink, SinkExt, Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::api::service_detail;
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::models::AskRequest;

/// Ordered inbound text frames
pub type FrameStream = Pin<Box<dyn Stream<Item = SyncResult<String>> + Send>>;

/// Outbound text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// Shape of a transport channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Server-to-client only
    PushStream,
    /// Both directions
    Duplex,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::PushStream => f.write_str("push-stream"),
            ChannelKind::Duplex => f.write_str("duplex"),
        }
    }
}

/// Where a channel connects to
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// Event stream opened by a POST carrying an optional JSON body
    EventStream { url: String, body: Option<Value> },
    /// WebSocket
    Socket { url: String },
}

impl Endpoint {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Endpoint::EventStream { .. } => ChannelKind::PushStream,
            Endpoint::Socket { .. } => ChannelKind::Duplex,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Endpoint::EventStream { url, .. } | Endpoint::Socket { url } => url,
        }
    }
}

/// Channel addresses for a DocuMind deployment
#[derive(Debug, Clone)]
pub struct Endpoints {
    api_base: String,
    ws_base: String,
}

impl Endpoints {
    pub fn new(config: &Config) -> Self {
        Self {
            api_base: config.api_base().to_string(),
            ws_base: config.websocket_base(),
        }
    }

    /// Streaming ask for a conversation; the request is the subscription
    pub fn chat_stream(&self, conversation_id: &str, request: &AskRequest) -> Endpoint {
        Endpoint::EventStream {
            url: format!(
                "{}/api/v1/conversations/{}/ask/stream",
                self.api_base, conversation_id
            ),
            body: serde_json::to_value(request).ok(),
        }
    }

    /// Chat socket for a conversation
    pub fn chat_socket(&self, conversation_id: &str) -> Endpoint {
        Endpoint::Socket {
            url: format!("{}/ws/chat/{}", self.ws_base, conversation_id),
        }
    }

    /// Processing status socket for a document
    pub fn document_status(&self, document_id: &str) -> Endpoint {
        Endpoint::Socket {
            url: format!("{}/ws/processing/{}", self.ws_base, document_id),
        }
    }
}

/// An established transport
pub struct Connection {
    pub frames: FrameStream,
    /// Present for duplex transports only
    pub sink: Option<FrameSink>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("duplex", &self.sink.is_some())
            .finish()
    }
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> SyncResult<Connection>;
}

/// Connector for real network endpoints
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    http: reqwest::Client,
}

impl NetworkConnector {
    /// Create a connector
    ///
    /// The HTTP client has a connect timeout but no total timeout: an event
    /// stream stays open for as long as the answer takes, and idle streams
    /// are caught by the channel keepalive instead.
    pub fn new(config: &Config) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(SyncError::transport)?;
        Ok(Self { http })
    }

    async fn connect_event_stream(
        &self,
        url: &str,
        body: Option<&Value>,
    ) -> SyncResult<Connection> {
        debug!("Opening event stream {}", url);
        let mut request = self.http.post(url).header(ACCEPT, "text/event-stream");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(SyncError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Service {
                status: status.as_u16(),
                detail: service_detail(&body),
            });
        }

        Ok(Connection {
            frames: Box::pin(SseFrames::new(response.bytes_stream())),
            sink: None,
        })
    }

    async fn connect_socket(&self, url: &str) -> SyncResult<Connection> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SyncError::Config(format!("Not a WebSocket URL: {}", url)));
        }

        debug!("Opening socket {}", url);
        let (ws_stream, _response) = connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(SyncError::from)
            .with(|text: String| future::ready(Ok::<_, SyncError>(Message::Text(text))));

        let frames = stream::unfold(read, |mut read| async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => return Some((Ok(text), read)),
                    Some(Ok(Message::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data).into_owned();
                        return Some((Ok(text), read));
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => {
                        // Ping/pong are handled by tungstenite
                    }
                    Some(Err(e)) => return Some((Err(SyncError::from(e)), read)),
                }
            }
        });

        Ok(Connection {
            frames: Box::pin(frames),
            sink: Some(Box::pin(sink)),
        })
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(&self, endpoint: &Endpoint) -> SyncResult<Connection> {
        match endpoint {
            Endpoint::EventStream { url, body } => {
                self.connect_event_stream(url, body.as_ref()).await
            }
            Endpoint::Socket { url } => self.connect_socket(url).await,
        }
    }
}

/// Server-sent events decoder over a byte stream
///
/// Buffers `data:` lines until a blank line and yields the joined data as
/// one frame. Comments and the `event`, `id` and `retry` fields are
/// ignored. An event left unterminated at end of stream is still yielded.
pub struct SseFrames<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    data: Vec<String>,
    ready: VecDeque<String>,
    finished: bool,
}

impl<S> SseFrames<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            buffer: Vec::new(),
            data: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.process_line(line.trim_end_matches('\r'));
        }
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self) {
        if !self.data.is_empty() {
            self.ready.push_back(self.data.join("\n"));
            self.data.clear();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.process_line(line.trim_end_matches('\r'));
        }
        self.dispatch();
    }
}

impl<S, B, E> Stream for SseFrames<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    type Item = SyncResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.feed(bytes.as_ref()),
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(SyncError::transport(e))));
                }
                Poll::Ready(None) => this.finish(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(chunks: &[&'static str]) -> SseFrames<impl Stream<Item = Result<&'static str, String>>> {
        let items: Vec<Result<&'static str, String>> = chunks.iter().map(|c| Ok(*c)).collect();
        SseFrames::new(stream::iter(items))
    }

    async fn collect(
        frames: SseFrames<impl Stream<Item = Result<&'static str, String>>>,
    ) -> Vec<String> {
        frames.map(|f| f.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_sse_single_events() {
        let frames = sse(&[
            "data: {\"type\":\"chunk\",\"content\":\"The \"}\n\n",
            "data: {\"type\":\"done\"}\n\n",
        ]);

        assert_eq!(
            collect(frames).await,
            vec![
                "{\"type\":\"chunk\",\"content\":\"The \"}".to_string(),
                "{\"type\":\"done\"}".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_sse_split_across_chunks() {
        let frames = sse(&["da", "ta: hel", "lo\r\n", "\r\n"]);
        assert_eq!(collect(frames).await, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_multiline_data_joined() {
        let frames = sse(&["data: line one\ndata: line two\n\n"]);
        assert_eq!(collect(frames).await, vec!["line one\nline two".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_ignores_comments_and_other_fields() {
        let frames = sse(&[": keepalive\n", "event: message\nid: 7\nretry: 100\ndata: x\n\n"]);
        assert_eq!(collect(frames).await, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_flushes_unterminated_event() {
        let frames = sse(&["data: tail"]);
        assert_eq!(collect(frames).await, vec!["tail".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_stream_error() {
        let items: Vec<Result<&'static str, String>> =
            vec![Ok("data: a\n\n"), Err("connection reset".to_string())];
        let mut frames = SseFrames::new(stream::iter(items));

        assert_eq!(frames.next().await.unwrap().unwrap(), "a");
        let err = frames.next().await.unwrap().unwrap_err();
        assert_eq!(err, SyncError::Transport("connection reset".to_string()));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_socket_requires_websocket_url() {
        let connector = NetworkConnector::new(&Config::default()).unwrap();
        let endpoint = Endpoint::Socket {
            url: "http://localhost:8000/ws/chat/c1".to_string(),
        };

        let err = connector.connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_endpoints() {
        let config = Config {
            api_url: "https://docs.example.com/".to_string(),
            ..Config::default()
        };
        let endpoints = Endpoints::new(&config);

        let stream = endpoints.chat_stream("c1", &AskRequest::new("Why?"));
        assert_eq!(stream.kind(), ChannelKind::PushStream);
        assert_eq!(
            stream.url(),
            "https://docs.example.com/api/v1/conversations/c1/ask/stream"
        );
        match stream {
            Endpoint::EventStream { body, .. } => {
                assert_eq!(body.unwrap()["question"], "Why?");
            }
            other => panic!("Expected event stream, got {:?}", other),
        }

        let socket = endpoints.chat_socket("c1");
        assert_eq!(socket.kind(), ChannelKind::Duplex);
        assert_eq!(socket.url(), "wss://docs.example.com/ws/chat/c1");

        assert_eq!(
            endpoints.document_status("d1").url(),
            "wss://docs.example.com/ws/processing/d1"
        );
    }
}
