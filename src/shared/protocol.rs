//! The MCP protocol engine.
//!
//! [`Protocol`] sits above one [`Transport`] and owns everything the wire
//! does not: the pending-request table, outgoing id allocation, the
//! request/notification handler registries, and the capability assertions
//! supplied by the client and server roles. It translates inbound envelopes
//! into handler dispatch or pending-table completion, and outgoing calls into
//! framed sends.
//!
//! # Concurrency
//!
//! Every inbound request handler runs in its own spawned task, so a slow
//! handler never blocks dispatch or replies for other in-flight ids. Handler
//! completion order is unconstrained. The pending table and registries are
//! guarded by short-lived locks that are never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::shared::transport::Transport;
use crate::types::{
    CancelledParams, ErrorCode, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Method, RequestId,
};

/// How long [`Protocol::request`] waits before failing with
/// [`Error::Timeout`] when the caller sets no explicit deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Role-specific capability assertions.
///
/// Each hook is a total function over the method, including methods whose
/// capabilities are still unknown pre-handshake: a call that requires a
/// negotiated capability before the handshake has completed must fail rather
/// than race.
pub trait CapabilityHooks: Send + Sync {
    /// May this side issue a request for `method` right now? For the client
    /// this consults the peer's advertised capability set.
    fn assert_capability_for_method(&self, method: &Method) -> Result<()>;

    /// May this side emit a notification for `method`?
    fn assert_notification_capability(&self, method: &Method) -> Result<()>;

    /// May this side register a request handler for `method`? Checked at
    /// registration time, never deferred to call time.
    fn assert_request_handler_capability(&self, method: &Method) -> Result<()>;

    /// May this side register a notification handler for `method`? Inbound
    /// notifications are not capability-gated by default.
    fn assert_notification_handler_capability(&self, _method: &Method) -> Result<()> {
        Ok(())
    }
}

/// Per-request options for [`Protocol::request`].
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// Deadline for the response; [`DEFAULT_REQUEST_TIMEOUT`] when unset.
    pub timeout: Option<Duration>,
    /// Caller-side cancellation link. Cancelling it unblocks the caller and
    /// notifies the peer so work tied to the id can stop there too.
    pub cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    /// Options with an explicit deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Options carrying a cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..Self::default()
        }
    }
}

/// Extra context handed to request handlers.
#[derive(Debug, Clone)]
pub struct RequestHandlerExtra {
    /// The id of the request being handled.
    pub request_id: RequestId,
    /// Cancelled when the peer sends `notifications/cancelled` for this id or
    /// the connection tears down. Handlers doing long work should observe it.
    pub cancellation: CancellationToken,
}

type RequestHandler = Arc<
    dyn Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
        + Send
        + Sync,
>;

type NotificationHandler =
    Arc<dyn Fn(JsonRpcNotification) -> BoxFuture<'static, ()> + Send + Sync>;

type PendingSender = oneshot::Sender<Result<serde_json::Value>>;

struct ProtocolInner {
    hooks: Arc<dyn CapabilityHooks>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingSender>>,
    in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    close_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    error_hook: RwLock<Option<Box<dyn Fn(Error) + Send + Sync>>>,
}

impl ProtocolInner {
    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::NotConnected)
    }

    fn remove_pending(&self, id: &RequestId) -> Option<PendingSender> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    fn report_error(&self, error: Error) {
        let guard = self.error_hook.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(hook) => hook(error),
            None => warn!("protocol error: {}", error),
        }
    }

    /// Connection teardown: every still-pending request fails with
    /// [`Error::ConnectionClosed`], every in-flight handler is cancelled, and
    /// the user close hook fires exactly once.
    fn handle_close(&self) {
        self.transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let pending: Vec<(RequestId, PendingSender)> = {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain().collect()
        };
        for (id, sender) in pending {
            debug!(%id, "failing pending request: connection closed");
            let _ = sender.send(Err(Error::ConnectionClosed));
        }

        let in_flight: Vec<CancellationToken> = {
            let mut guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain().map(|(_, token)| token).collect()
        };
        for token in in_flight {
            token.cancel();
        }

        let hook = self
            .close_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    async fn send_message(&self, message: JsonRpcMessage) -> Result<()> {
        self.transport()?.send(message).await
    }
}

/// The protocol engine shared by the client and server roles.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<ProtocolInner>,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .inner
            .pending
            .lock()
            .map(|p| p.len())
            .unwrap_or_default();
        f.debug_struct("Protocol")
            .field("pending_requests", &pending)
            .finish_non_exhaustive()
    }
}

impl Protocol {
    /// Creates an engine with the given role hooks.
    pub fn new(hooks: Arc<dyn CapabilityHooks>) -> Self {
        Self {
            inner: Arc::new(ProtocolInner {
                hooks,
                transport: Mutex::new(None),
                next_id: AtomicI64::new(0),
                pending: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                request_handlers: RwLock::new(HashMap::new()),
                notification_handlers: RwLock::new(HashMap::new()),
                close_hook: Mutex::new(None),
                error_hook: RwLock::new(None),
            }),
        }
    }

    /// Installs a hook fired exactly once when the connection closes.
    pub fn on_close(&self, hook: Box<dyn FnOnce() + Send>) {
        *self
            .inner
            .close_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Installs a hook for out-of-band errors (decode failures, unknown
    /// response ids, transport faults).
    pub fn on_error(&self, hook: Box<dyn Fn(Error) + Send + Sync>) {
        *self
            .inner
            .error_hook
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Attaches `transport`, wiring its callbacks into this engine, then
    /// starts it. Messages arriving from the very first moment of `start()`
    /// are dispatched.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        {
            let dispatch = self.inner.clone();
            transport.on_message(Box::new(move |message| {
                let inner = dispatch.clone();
                Box::pin(async move {
                    Protocol { inner }.dispatch(message).await;
                })
            }));
        }
        {
            let inner = self.inner.clone();
            transport.on_close(Box::new(move || inner.handle_close()));
        }
        {
            let inner = self.inner.clone();
            transport.on_error(Box::new(move |error| inner.report_error(error)));
        }

        *self
            .inner
            .transport
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(transport.clone());

        transport.start().await
    }

    /// Closes the attached transport, failing every pending request.
    pub async fn close(&self) -> Result<()> {
        let transport = {
            let guard = self
                .inner
                .transport
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        match transport {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }

    /// Sends a request and suspends until its response, deadline, or
    /// cancellation.
    ///
    /// Exactly one of four things resolves the call: a matching response
    /// (`Ok`), a matching error response (`Err(Error::Rpc { .. })`), the
    /// deadline (`Err(Error::Timeout)`), or caller cancellation
    /// (`Err(Error::Cancelled)`, after signalling the peer with
    /// `notifications/cancelled`).
    pub async fn request(
        &self,
        method: Method,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value> {
        self.inner.hooks.assert_capability_for_method(&method)?;

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);

        let request = JsonRpcRequest::new(method, params, id.clone());
        if let Err(error) = self.inner.send_message(request.into()).await {
            self.inner.remove_pending(&id);
            return Err(error);
        }

        let timeout = options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let cancellation = options.cancellation;
        let cancelled = async {
            match &cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            outcome = &mut rx => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionClosed),
            },
            _ = tokio::time::sleep(timeout) => {
                self.inner.remove_pending(&id);
                Err(Error::Timeout)
            }
            _ = cancelled => {
                self.inner.remove_pending(&id);
                // Cancellation is bidirectional: tell the peer so its handler
                // for this id can stop as well.
                let params = serde_json::to_value(CancelledParams {
                    request_id: id,
                    reason: None,
                })
                .ok();
                let notification = JsonRpcNotification::new(Method::Cancelled, params);
                if let Err(error) = self.inner.send_message(notification.into()).await {
                    debug!("failed to send cancellation notification: {}", error);
                }
                Err(Error::Cancelled)
            }
        }
    }

    /// Sends a fire-and-forget notification.
    pub async fn notification(
        &self,
        method: Method,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.inner.hooks.assert_notification_capability(&method)?;
        let notification = JsonRpcNotification::new(method, params);
        self.inner.send_message(notification.into()).await
    }

    /// Registers a request handler for `method`.
    ///
    /// Fails immediately with [`Error::CapabilityNotSupported`] when the
    /// local capability set does not permit the method; no handler is
    /// installed in that case.
    pub fn set_request_handler<F>(&self, method: Method, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.hooks.assert_request_handler_capability(&method)?;
        debug!(method = %method, "registering request handler");
        self.inner
            .request_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method.as_str().to_string(), Arc::new(handler));
        Ok(())
    }

    /// Registers a notification handler for `method`, subject to the same
    /// registration-time capability check as request handlers.
    pub fn set_notification_handler<F>(&self, method: Method, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcNotification) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.inner
            .hooks
            .assert_notification_handler_capability(&method)?;
        debug!(method = %method, "registering notification handler");
        self.inner
            .notification_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method.as_str().to_string(), Arc::new(handler));
        Ok(())
    }

    /// Classifies one inbound envelope and routes it.
    async fn dispatch(&self, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Request(request) => self.dispatch_request(request),
            JsonRpcMessage::Notification(notification) => {
                self.dispatch_notification(notification)
            }
            JsonRpcMessage::Response(response) => {
                self.complete_pending(response.id, Ok(response.result));
            }
            JsonRpcMessage::Error(error) => {
                let failure =
                    Error::from_rpc(error.error.code, error.error.message, error.error.data);
                self.complete_pending(error.id, Err(failure));
            }
        }
    }

    fn dispatch_request(&self, request: JsonRpcRequest) {
        let handler = {
            let guard = self
                .inner
                .request_handlers
                .read()
                .unwrap_or_else(|e| e.into_inner());
            guard.get(request.method.as_str()).cloned()
        };

        let Some(handler) = handler else {
            // The peer is never left without a reply.
            debug!(method = %request.method, "no handler registered, answering method not found");
            let reply = JsonRpcError::new(
                request.id,
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            );
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(error) = inner.send_message(reply.into()).await {
                    inner.report_error(error);
                }
            });
            return;
        };

        let id = request.id.clone();
        let token = CancellationToken::new();
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), token.clone());

        let extra = RequestHandlerExtra {
            request_id: id.clone(),
            cancellation: token.clone(),
        };
        let inner = self.inner.clone();

        // One task per in-flight request: a slow handler must not block
        // dispatch or replies for other ids.
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                result = handler(request, extra) => Some(result),
            };
            inner
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);

            // A cancelled request gets no reply; the peer stopped waiting.
            let Some(outcome) = outcome else {
                debug!(%id, "request cancelled before completion");
                return;
            };

            let reply: JsonRpcMessage = match outcome {
                Ok(result) => JsonRpcResponse::new(id, result).into(),
                Err(Error::Rpc {
                    code,
                    message,
                    data,
                }) => {
                    let mut error = JsonRpcError::new(id, code, message);
                    error.error.data = data;
                    error.into()
                }
                Err(error) => {
                    JsonRpcError::new(id, ErrorCode::INTERNAL_ERROR, error.to_string()).into()
                }
            };
            if let Err(error) = inner.send_message(reply).await {
                inner.report_error(error);
            }
        });
    }

    fn dispatch_notification(&self, notification: JsonRpcNotification) {
        if notification.method == Method::Cancelled {
            self.handle_cancelled(&notification);
            return;
        }

        let handler = {
            let guard = self
                .inner
                .notification_handlers
                .read()
                .unwrap_or_else(|e| e.into_inner());
            guard.get(notification.method.as_str()).cloned()
        };
        match handler {
            Some(handler) => {
                tokio::spawn(handler(notification));
            }
            None => {
                // Notifications never produce a reply; unknown ones are
                // simply dropped.
                debug!(method = %notification.method, "ignoring unhandled notification");
            }
        }
    }

    /// Cancels the in-flight handler named by a `notifications/cancelled`
    /// from the peer. Ids with no in-flight handler are ignored.
    fn handle_cancelled(&self, notification: &JsonRpcNotification) {
        let params = notification.params.clone().unwrap_or_default();
        match serde_json::from_value::<CancelledParams>(params) {
            Ok(cancelled) => {
                let token = self
                    .inner
                    .in_flight
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&cancelled.request_id);
                if let Some(token) = token {
                    debug!(id = %cancelled.request_id, "peer cancelled in-flight request");
                    token.cancel();
                }
            }
            Err(error) => self.inner.report_error(error.into()),
        }
    }

    /// Completes the pending entry for `id`. An id with no pending entry is
    /// reported through the error hook and the table is left untouched.
    fn complete_pending(&self, id: RequestId, result: Result<serde_json::Value>) {
        match self.inner.remove_pending(&id) {
            Some(sender) => {
                // A send failure means the caller stopped waiting (timeout or
                // cancellation won the race); the late result is discarded.
                if sender.send(result).is_err() {
                    debug!(%id, "discarding response for a request that stopped waiting");
                }
            }
            None => {
                self.inner.report_error(Error::UnknownResponseId(id));
            }
        }
    }
}
