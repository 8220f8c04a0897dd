//! Server-Sent-Events server transport.
//!
//! One SSE connection carries server-to-client traffic; the client sends its
//! messages back as HTTP POSTs. On start the transport emits a single
//! `endpoint` event telling the client where to POST, with a session id
//! appended so concurrent connections stay separated, then streams `message`
//! events until the connection ends.
//!
//! [`sse_router`] wires both directions into an [`axum`] router: a GET
//! establishes the event stream and a POST (routed by `sessionId`) feeds
//! inbound messages to the right in-memory session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::shared::transport::{
    CloseCallback, ErrorCallback, MessageCallback, Transport, TransportCallbacks,
};
use crate::types::JsonRpcMessage;

/// The query parameter carrying the session id on POSTs.
pub const SESSION_ID_PARAM: &str = "sessionId";

struct Inner {
    callbacks: TransportCallbacks,
    /// True once the endpoint event has been queued.
    initialized: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    halt: CancellationToken,
}

/// Server transport for SSE: sends messages over an SSE connection and
/// receives messages from HTTP POST requests.
///
/// `endpoint` is the relative POST URL clients are directed to via the
/// `endpoint` event.
pub struct SseServerTransport {
    endpoint: String,
    session_id: String,
    inner: Arc<Inner>,
    started: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl std::fmt::Debug for SseServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseServerTransport")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SseServerTransport {
    /// Creates a transport directing clients to POST messages to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint: endpoint.into(),
            session_id: Uuid::new_v4().to_string(),
            inner: Arc::new(Inner {
                callbacks: TransportCallbacks::new(),
                initialized: AtomicBool::new(false),
                outbound: Mutex::new(Some(tx)),
                halt: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
            events: Mutex::new(Some(rx)),
        }
    }

    /// The collision-resistant token identifying this session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Takes the outbound event stream, to be served as the body of the SSE
    /// response. Yields `None` after the first call.
    pub fn take_event_stream(
        &self,
    ) -> Option<impl Stream<Item = std::result::Result<Event, Infallible>>> {
        let rx = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        Some(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        }))
    }

    /// Handles one inbound POST for this session.
    ///
    /// Responds 500 before the endpoint event has been sent, 400 on a wrong
    /// content type or an undecodable body (the SSE connection stays up),
    /// and 202 once the message has been dispatched.
    pub async fn handle_post_message(
        &self,
        headers: &HeaderMap,
        body: Bytes,
    ) -> (StatusCode, String) {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            let message = "SSE connection not established".to_string();
            self.inner
                .callbacks
                .forward_error(Error::Transport(message.clone()));
            return (StatusCode::INTERNAL_SERVER_ERROR, message);
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if content_type != "application/json"
            && !content_type.starts_with("application/json;")
        {
            let message = format!("Unsupported content-type: {}", content_type);
            self.inner
                .callbacks
                .forward_error(Error::Transport(message.clone()));
            return (StatusCode::BAD_REQUEST, message);
        }

        match serde_json::from_slice::<JsonRpcMessage>(&body) {
            Ok(message) => {
                self.inner.callbacks.forward_message(message).await;
                (StatusCode::ACCEPTED, "Accepted".to_string())
            }
            Err(error) => {
                let message = format!("Invalid message: {}", error);
                self.inner.callbacks.forward_error(error.into());
                (StatusCode::BAD_REQUEST, message)
            }
        }
    }

    fn queue_event(&self, event: Event) -> Result<()> {
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
            .send(event)
            .map_err(|_| Error::NotConnected)
    }
}

#[async_trait]
impl Transport for SseServerTransport {
    /// Emits the `endpoint` event, then suspends until the SSE stream is
    /// torn down, firing the close callback on completion.
    async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        debug!(session_id = %self.session_id, "starting SSE session");
        self.queue_event(
            Event::default()
                .event("endpoint")
                .data(format!("{}?{}={}", self.endpoint, SESSION_ID_PARAM, self.session_id)),
        )?;
        self.inner.initialized.store(true, Ordering::SeqCst);

        let closed = async {
            let guard = {
                let outbound = self
                    .inner
                    .outbound
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                outbound.clone()
            };
            match guard {
                Some(sender) => sender.closed().await,
                None => {}
            }
        };
        tokio::select! {
            _ = closed => debug!(session_id = %self.session_id, "SSE stream ended"),
            _ = self.inner.halt.cancelled() => {}
        }
        self.inner.callbacks.forward_close();
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let json = serde_json::to_string(&message)?;
        self.queue_event(Event::default().event("message").data(json))
    }

    async fn close(&self) -> Result<()> {
        self.inner.halt.cancel();
        // Dropping the sender ends the event stream, finishing the response.
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.inner.callbacks.forward_close();
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

/// Callback invoked with each new session's transport. Typically it builds a
/// [`Server`](crate::server::Server) and connects it; the future runs for
/// the lifetime of the session.
pub type SseConnectHandler = Arc<dyn Fn(Arc<SseServerTransport>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
struct SseAppState {
    endpoint: String,
    sessions: Arc<Mutex<HashMap<String, Arc<SseServerTransport>>>>,
    on_connect: SseConnectHandler,
}

impl std::fmt::Debug for SseAppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseAppState")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Builds a router serving the SSE transport: `GET /` opens an event stream
/// and mints a session, `POST {endpoint}` feeds messages back in, routed by
/// the `sessionId` query parameter.
pub fn sse_router(endpoint: &str, on_connect: SseConnectHandler) -> Router {
    let state = SseAppState {
        endpoint: endpoint.to_string(),
        sessions: Arc::new(Mutex::new(HashMap::new())),
        on_connect,
    };
    Router::new()
        .route("/", get(handle_sse))
        .route(endpoint, post(handle_post))
        .with_state(state)
}

async fn handle_sse(
    State(state): State<SseAppState>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, StatusCode>
{
    let transport = Arc::new(SseServerTransport::new(&state.endpoint));
    let stream = transport
        .take_event_stream()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let session_id = transport.session_id().to_string();
    state
        .sessions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(session_id.clone(), transport.clone());
    debug!(%session_id, "SSE session opened");

    let sessions = state.sessions.clone();
    let connected = (state.on_connect)(transport);
    tokio::spawn(async move {
        // Runs for the whole session; unregister once it ends.
        connected.await;
        sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id);
        debug!(%session_id, "SSE session closed");
    });

    Ok(Sse::new(stream))
}

async fn handle_post(
    State(state): State<SseAppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let Some(session_id) = params.get(SESSION_ID_PARAM) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Missing {} query parameter", SESSION_ID_PARAM),
        );
    };

    let transport = {
        let sessions = state.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    };
    match transport {
        Some(transport) => transport.handle_post_message(&headers, body).await,
        None => {
            warn!(%session_id, "POST for unknown SSE session");
            (StatusCode::NOT_FOUND, "Session not found".to_string())
        }
    }
}
