//! Server-Sent-Events client transport.
//!
//! The client holds a long-lived GET open for server-to-client events and
//! POSTs its own messages to the endpoint the server announces. `start`
//! does not complete until that `endpoint` event arrives, so a caller can
//! send immediately once connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::shared::transport::{
    CloseCallback, ErrorCallback, MessageCallback, Transport, TransportCallbacks,
};
use crate::types::JsonRpcMessage;

/// One parsed SSE event.
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental parser for a `text/event-stream` body.
///
/// Tracks only the `event` and `data` fields; `id`, `retry`, and comment
/// lines are skipped. Multiple `data` lines accumulate joined by newlines,
/// and a blank line dispatches the pending event.
///
/// Raw bytes accumulate until a line terminator arrives; only complete lines
/// are converted to text, so a multibyte character split across network
/// chunks stays intact.
#[derive(Default)]
struct EventStreamParser {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStreamParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(newline + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.take_pending() {
                    events.push(event);
                }
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.trim_start().to_string());
            }
            // id, retry, and ":" comment lines are not used here.
        }
        events
    }

    fn take_pending(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event, data })
    }
}

struct Inner {
    callbacks: TransportCallbacks,
    /// POST target, resolved from the server's `endpoint` event.
    endpoint: RwLock<Option<Url>>,
    closed: AtomicBool,
}

/// Client transport for SSE: receives messages as SSE events and sends them
/// as HTTP POSTs to the server-announced endpoint.
pub struct SseClientTransport {
    url: Url,
    http: reqwest::Client,
    inner: Arc<Inner>,
    started: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SseClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClientTransport")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl SseClientTransport {
    /// Creates a transport for the SSE stream at `url`.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Same as [`new`](Self::new) with a caller-supplied HTTP client, for
    /// custom timeouts or proxies.
    pub fn with_client(url: &str, http: reqwest::Client) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            url,
            http,
            inner: Arc::new(Inner {
                callbacks: TransportCallbacks::new(),
                endpoint: RwLock::new(None),
                closed: AtomicBool::new(false),
            }),
            started: AtomicBool::new(false),
            reader: Mutex::new(None),
        })
    }

    /// The endpoint messages are POSTed to, once known.
    pub fn endpoint(&self) -> Option<Url> {
        self.inner
            .endpoint
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    /// Opens the event stream and waits for the server's `endpoint` event
    /// before returning.
    async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        let response = self
            .http
            .get(self.url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Result<()>>();
        let inner = self.inner.clone();
        let base = self.url.clone();
        let handle = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut parser = EventStreamParser::default();
            let mut endpoint_tx = Some(endpoint_tx);
            'stream: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        inner.callbacks.forward_error(error.into());
                        break;
                    }
                };
                for event in parser.push(&chunk) {
                    match event.event.as_str() {
                        "endpoint" => {
                            let resolved = base
                                .join(&event.data)
                                .map_err(|e| Error::Transport(e.to_string()));
                            match resolved {
                                Ok(endpoint) => {
                                    debug!(%endpoint, "received SSE endpoint");
                                    *inner
                                        .endpoint
                                        .write()
                                        .unwrap_or_else(|e| e.into_inner()) = Some(endpoint);
                                    if let Some(tx) = endpoint_tx.take() {
                                        let _ = tx.send(Ok(()));
                                    }
                                }
                                Err(error) => {
                                    if let Some(tx) = endpoint_tx.take() {
                                        let _ = tx.send(Err(error));
                                    } else {
                                        inner.callbacks.forward_error(error);
                                    }
                                    break 'stream;
                                }
                            }
                        }
                        "open" => debug!("SSE stream open"),
                        "error" => {
                            inner.callbacks.forward_error(Error::Transport(event.data));
                            break 'stream;
                        }
                        // Any other event name, the default "message"
                        // included, carries a JSON-RPC envelope.
                        _ => match serde_json::from_str::<JsonRpcMessage>(&event.data) {
                            Ok(message) => inner.callbacks.forward_message(message).await,
                            // An undecodable envelope is not fatal.
                            Err(error) => inner.callbacks.forward_error(error.into()),
                        },
                    }
                }
            }
            if !inner.closed.swap(true, Ordering::SeqCst) {
                inner.callbacks.forward_close();
            }
        });
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        match endpoint_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(
                "SSE stream ended before endpoint event".to_string(),
            )),
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let endpoint = self.endpoint().ok_or(Error::NotConnected)?;
        let json = serde_json::to_string(&message)?;
        let response = self
            .http
            .post(endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .body(json)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = format!("POST rejected: {} {}", status, body);
            warn!(%status, "message POST rejected");
            self.inner
                .callbacks
                .forward_error(Error::Transport(detail.clone()));
            return Err(Error::Transport(detail));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.callbacks.forward_close();
        }
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) {
        self.inner.callbacks.set_message(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.inner.callbacks.set_error(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        self.inner.callbacks.set_close(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::EventStreamParser;

    #[test]
    fn parses_events_split_across_chunks() {
        let mut parser = EventStreamParser::default();
        assert!(parser.push(b"event: endpoint\ndata: /mes").is_empty());
        let events = parser.push(b"sage?sessionId=abc\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/message?sessionId=abc");
    }

    #[test]
    fn defaults_event_type_and_joins_data_lines() {
        let mut parser = EventStreamParser::default();
        let events = parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn skips_comments_and_unknown_fields() {
        let mut parser = EventStreamParser::default();
        let events = parser.push(b": keep-alive\r\nid: 7\r\nevent: message\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn reassembles_a_multibyte_character_split_across_chunks() {
        let mut parser = EventStreamParser::default();
        let line = "data: {\"name\":\"héllo\"}\n\n";
        let bytes = line.as_bytes();
        // Split in the middle of the two-byte 'é'.
        let split = line.find('é').unwrap() + 1;

        assert!(parser.push(&bytes[..split]).is_empty());
        let events = parser.push(&bytes[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"name\":\"héllo\"}");
    }
}
