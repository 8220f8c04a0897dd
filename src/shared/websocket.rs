//! Socket-frame transport core.
//!
//! Carries exactly one JSON-RPC envelope per WebSocket text frame. Both the
//! client connector and the server acceptor wrap an established
//! [`WebSocketStream`] in a [`WebSocketTransport`]; the handshake on each
//! side negotiates the [`MCP_SUBPROTOCOL`] token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::stream::StreamExt;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::shared::transport::{
    CloseCallback, ErrorCallback, MessageCallback, Transport, TransportCallbacks,
};
use crate::types::JsonRpcMessage;

/// The sub-protocol token both sides send during the WebSocket handshake.
pub const MCP_SUBPROTOCOL: &str = "mcp";

struct Inner {
    callbacks: TransportCallbacks,
    closed: AtomicBool,
    outbound: StdMutex<Option<mpsc::UnboundedSender<WsMessage>>>,
}

impl Inner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.callbacks.forward_close();
    }
}

/// A transport that frames each message as one WebSocket text frame.
///
/// Works for both roles; the difference is only in how the underlying
/// session was established (see [`crate::client::WebSocketClientTransport`]
/// and [`crate::server::accept_websocket`]).
pub struct WebSocketTransport<S> {
    inner: Arc<Inner>,
    started: AtomicBool,
    session: StdMutex<Option<WebSocketStream<S>>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    writer_task: StdMutex<Option<JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for WebSocketTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an already-negotiated WebSocket session.
    pub fn new(session: WebSocketStream<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                callbacks: TransportCallbacks::new(),
                closed: AtomicBool::new(false),
                outbound: StdMutex::new(None),
            }),
            started: AtomicBool::new(false),
            session: StdMutex::new(Some(session)),
            reader_task: StdMutex::new(None),
            writer_task: StdMutex::new(None),
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        let session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(Error::AlreadyStarted)?;
        let (mut ws_sender, mut ws_receiver) = session.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let writer_inner = self.inner.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(error) = ws_sender.send(frame).await {
                    writer_inner.callbacks.forward_error(error.into());
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader_inner = self.inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                        Ok(message) => reader_inner.callbacks.forward_message(message).await,
                        Err(error) => {
                            reader_inner.callbacks.forward_error(error.into());
                            break;
                        }
                    },
                    // Control frames are answered by tungstenite itself.
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
                    Ok(WsMessage::Close(_)) => {
                        debug!("websocket closed by peer");
                        break;
                    }
                    Ok(other) => {
                        // One text frame per message is the whole framing
                        // contract; a binary frame is a fatal violation.
                        reader_inner.callbacks.forward_error(Error::Transport(format!(
                            "Expected text frame, got: {:?}",
                            other
                        )));
                        break;
                    }
                    Err(error) => {
                        reader_inner.callbacks.forward_error(error.into());
                        break;
                    }
                }
            }
            reader_inner.shutdown();
        });

        *self.reader_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);
        *self.writer_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(writer);
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) || self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let json = serde_json::to_string(&message)?;
        let sender = {
            let guard = self
                .inner
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        sender
            .ok_or(Error::NotConnected)?
            .send(WsMessage::Text(json))
            .map_err(|_| Error::NotConnected)
    }

    async fn close(&self) -> Result<()> {
        // Queue a Close frame for the peer, then stop both tasks.
        let sender = {
            let guard = self
                .inner
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(sender) = sender {
            let _ = sender.send(WsMessage::Close(None));
        }
        self.inner.shutdown();

        if let Some(reader) = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
        let writer = self
            .writer_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(writer) = writer {
            let _ = writer.await;
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
