//! In-process transport pair.
//!
//! Links a client and a server living in the same process, with no wire in
//! between. Messages sent before the peer has started are queued and
//! delivered when its `start()` runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::shared::transport::{
    CloseCallback, ErrorCallback, MessageCallback, Transport, TransportCallbacks,
};
use crate::types::JsonRpcMessage;

struct Inner {
    callbacks: TransportCallbacks,
    started: AtomicBool,
    closed: AtomicBool,
    queue: Mutex<VecDeque<JsonRpcMessage>>,
    peer: Mutex<Option<Arc<Inner>>>,
}

impl Inner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: TransportCallbacks::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            peer: Mutex::new(None),
        })
    }

    fn take_peer(&self) -> Option<Arc<Inner>> {
        self.peer.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// One end of an in-memory transport pair.
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport").finish_non_exhaustive()
    }
}

impl InMemoryTransport {
    /// Creates a linked pair of transports. Pass one end to a client and the
    /// other to a server.
    pub fn create_linked_pair() -> (InMemoryTransport, InMemoryTransport) {
        let first = Inner::new();
        let second = Inner::new();
        *first.peer.lock().unwrap_or_else(|e| e.into_inner()) = Some(second.clone());
        *second.peer.lock().unwrap_or_else(|e| e.into_inner()) = Some(first.clone());
        (
            InMemoryTransport { inner: first },
            InMemoryTransport { inner: second },
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        // Deliver anything the peer sent before we started.
        loop {
            let message = {
                let mut queue = self
                    .inner
                    .queue
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                queue.pop_front()
            };
            match message {
                Some(message) => self.inner.callbacks.forward_message(message).await,
                None => break,
            }
        }
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let peer = {
            let guard = self.inner.peer.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let peer = peer.ok_or(Error::NotConnected)?;
        if peer.started.load(Ordering::SeqCst) {
            peer.callbacks.forward_message(message).await;
        } else {
            peer.queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(message);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(peer) = self.inner.take_peer() {
            peer.take_peer();
            if !peer.closed.swap(true, Ordering::SeqCst) {
                peer.callbacks.forward_close();
            }
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
