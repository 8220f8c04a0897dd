//! Line-delimited stream transport.
//!
//! Carries one JSON-RPC envelope per LF-terminated line over any pair of
//! byte streams. This is the stdio transport of the protocol: a server reads
//! stdin and writes stdout, a client holds the other end of those pipes, but
//! any `AsyncRead`/`AsyncWrite` pair works (tests use `tokio::io::duplex`).
//!
//! `start()` launches a reader task that pulls 8 KiB chunks into a
//! [`ReadBuffer`] and dispatches every decoded message, and a writer task
//! that drains an unbounded FIFO queue, flushing after each line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::shared::read_buffer::{serialize_message, ReadBuffer};
use crate::shared::transport::{
    CloseCallback, ErrorCallback, MessageCallback, Transport, TransportCallbacks,
};
use crate::types::JsonRpcMessage;

const READ_CHUNK_SIZE: usize = 8192;

struct Inner {
    callbacks: TransportCallbacks,
    closed: AtomicBool,
    read_buffer: Mutex<ReadBuffer>,
    outbound: StdMutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl Inner {
    /// Tears down shared state and fires the close callback once.
    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets the writer drain its queue and exit.
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.read_buffer.lock().await.clear();
        self.callbacks.forward_close();
    }
}

/// A transport that frames messages as JSON lines over a byte stream pair.
pub struct StdioTransport<R, W> {
    inner: Arc<Inner>,
    started: AtomicBool,
    io: StdMutex<Option<(R, W)>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    writer_task: StdMutex<Option<JoinHandle<()>>>,
}

impl<R, W> std::fmt::Debug for StdioTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// The server arrangement: this process's own stdin and stdout.
pub type StdioServerTransport = StdioTransport<tokio::io::Stdin, tokio::io::Stdout>;

/// The client arrangement: the piped stdio of a spawned server process.
pub type StdioClientTransport =
    StdioTransport<tokio::process::ChildStdout, tokio::process::ChildStdin>;

impl StdioServerTransport {
    /// Creates a transport over this process's stdin and stdout, the usual
    /// server arrangement.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over the given byte streams.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            inner: Arc::new(Inner {
                callbacks: TransportCallbacks::new(),
                closed: AtomicBool::new(false),
                read_buffer: Mutex::new(ReadBuffer::new()),
                outbound: StdMutex::new(None),
            }),
            started: AtomicBool::new(false),
            io: StdMutex::new(Some((reader, writer))),
            reader_task: StdMutex::new(None),
            writer_task: StdMutex::new(None),
        }
    }

    fn spawn_reader(&self, mut reader: R) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        debug!("stream transport reached EOF");
                        break;
                    }
                    Ok(n) => {
                        let mut buffer = inner.read_buffer.lock().await;
                        buffer.append(&chunk[..n]);
                        loop {
                            match buffer.read_message() {
                                Ok(Some(message)) => {
                                    // Release the buffer while dispatching so
                                    // close() can clear it.
                                    drop(buffer);
                                    inner.callbacks.forward_message(message).await;
                                    buffer = inner.read_buffer.lock().await;
                                }
                                Ok(None) => break,
                                Err(error) => inner.callbacks.forward_error(error),
                            }
                        }
                    }
                    Err(error) => {
                        inner.callbacks.forward_error(error.into());
                        break;
                    }
                }
            }
            // EOF or a reader fault closes the transport.
            inner.shutdown().await;
        })
    }

    fn spawn_writer(
        &self,
        mut writer: W,
        mut queue: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let line = match serialize_message(&message) {
                    Ok(line) => line,
                    Err(error) => {
                        inner.callbacks.forward_error(error);
                        continue;
                    }
                };
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(error) = written {
                    // A write fault only closes the output side; the error
                    // still surfaces through the error callback.
                    inner.callbacks.forward_error(error.into());
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        let (reader, writer) = self
            .io
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(Error::AlreadyStarted)?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);

        *self.reader_task.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(self.spawn_reader(reader));
        *self.writer_task.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(self.spawn_writer(writer, rx));
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let sender = {
            let guard = self
                .inner
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        // The queue is unbounded: enqueueing never rejects or drops.
        sender
            .ok_or(Error::NotConnected)?
            .send(message)
            .map_err(|_| Error::NotConnected)
    }

    async fn close(&self) -> Result<()> {
        if let Some(reader) = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
        self.inner.shutdown().await;
        // The writer exits after draining whatever was queued before close.
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
