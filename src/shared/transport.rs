//! Transport abstraction for the MCP protocol.
//!
//! A [`Transport`] owns the connection lifecycle and wire framing for one
//! point-to-point channel and nothing else; protocol semantics live in
//! [`Protocol`](crate::shared::protocol::Protocol). Implementations deliver
//! inbound traffic through callbacks which must be installed before
//! [`Transport::start`] is called, or messages may be lost.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::JsonRpcMessage;

/// Callback invoked for every inbound message.
pub type MessageCallback =
    Box<dyn Fn(JsonRpcMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback invoked for out-of-band error conditions. Errors reported this
/// way are not necessarily fatal.
pub type ErrorCallback = Box<dyn Fn(Error) + Send + Sync>;

/// Callback invoked when the connection closes, for any reason. Fired at most
/// once per transport.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// The minimal contract for an MCP transport a client or server can
/// communicate over.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts processing messages, including any connection steps the
    /// transport needs. Erroring if called twice. [`Protocol::connect`]
    /// calls this implicitly; do not call it again when using that layer.
    ///
    /// [`Protocol::connect`]: crate::shared::protocol::Protocol
    async fn start(&self) -> Result<()>;

    /// Sends a JSON-RPC message. Fails with [`Error::NotConnected`] if the
    /// transport is not started or already closed.
    async fn send(&self, message: JsonRpcMessage) -> Result<()>;

    /// Closes the connection, releasing the underlying I/O. The close
    /// callback fires exactly once even if this is called repeatedly or the
    /// transport already closed itself.
    async fn close(&self) -> Result<()>;

    /// Installs the inbound message callback.
    fn on_message(&self, callback: MessageCallback);

    /// Installs the error callback.
    fn on_error(&self, callback: ErrorCallback);

    /// Installs the close callback.
    fn on_close(&self, callback: CloseCallback);
}

/// Shared callback storage for transport implementations.
///
/// Every concrete transport embeds one of these and forwards events through
/// it; `forward_close` guarantees the close callback fires at most once.
#[derive(Default)]
pub struct TransportCallbacks {
    message: RwLock<Option<MessageCallback>>,
    error: RwLock<Option<ErrorCallback>>,
    close: Mutex<Option<CloseCallback>>,
}

impl std::fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCallbacks").finish_non_exhaustive()
    }
}

impl TransportCallbacks {
    /// Creates empty callback storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the message callback.
    pub fn set_message(&self, callback: MessageCallback) {
        *self.message.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Replaces the error callback.
    pub fn set_error(&self, callback: ErrorCallback) {
        *self.error.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Replaces the close callback.
    pub fn set_close(&self, callback: CloseCallback) {
        *self.close.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Delivers an inbound message to the registered callback, if any.
    pub async fn forward_message(&self, message: JsonRpcMessage) {
        let future = {
            let guard = self.message.read().unwrap_or_else(|e| e.into_inner());
            guard.as_ref().map(|callback| callback(message))
        };
        if let Some(future) = future {
            future.await;
        }
    }

    /// Reports an out-of-band error to the registered callback, if any.
    pub fn forward_error(&self, error: Error) {
        let guard = self.error.read().unwrap_or_else(|e| e.into_inner());
        if let Some(callback) = guard.as_ref() {
            callback(error);
        }
    }

    /// Fires the close callback. Subsequent calls are no-ops.
    pub fn forward_close(&self) {
        let callback = self
            .close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }
}
