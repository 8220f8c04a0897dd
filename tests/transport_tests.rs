//! Transport behavior tests: line framing over byte streams, close and EOF
//! semantics, and the in-memory pair's pre-start queueing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use mcp_sdk::shared::{InMemoryTransport, StdioTransport, Transport};
use mcp_sdk::types::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, Method, RequestId};
use mcp_sdk::Error;

fn collect_messages(transport: &dyn Transport) -> mpsc::UnboundedReceiver<JsonRpcMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.on_message(Box::new(move |message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(message);
        })
    }));
    rx
}

fn collect_errors(transport: &dyn Transport) -> mpsc::UnboundedReceiver<Error> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.on_error(Box::new(move |error| {
        let _ = tx.send(error);
    }));
    rx
}

fn request(id: i64) -> JsonRpcMessage {
    JsonRpcRequest::new(Method::Ping, None, RequestId::from(id)).into()
}

/// A connected pair of stream transports over an in-process duplex pipe.
fn duplex_transports() -> (
    StdioTransport<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    StdioTransport<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
) {
    let (left, right) = tokio::io::duplex(4096);
    let (left_reader, left_writer) = tokio::io::split(left);
    let (right_reader, right_writer) = tokio::io::split(right);
    (
        StdioTransport::new(left_reader, left_writer),
        StdioTransport::new(right_reader, right_writer),
    )
}

async fn recv_one<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed")
}

#[tokio::test]
async fn stream_transport_delivers_messages_in_send_order() {
    let (sender, receiver) = duplex_transports();
    let mut inbound = collect_messages(&receiver);
    assert_ok!(sender.start().await);
    assert_ok!(receiver.start().await);

    for id in 0..3 {
        assert_ok!(sender.send(request(id)).await);
    }
    for id in 0..3 {
        let message = recv_one(&mut inbound).await;
        assert_eq!(message, request(id));
    }
}

#[tokio::test]
async fn stream_transport_waits_for_the_newline() {
    let (raw, framed) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(framed);
    let transport = StdioTransport::new(reader, writer);
    let mut inbound = collect_messages(&transport);
    transport.start().await.unwrap();

    let mut raw = raw;
    let line = serde_json::to_string(&request(1)).unwrap();
    let (head, tail) = line.split_at(line.len() / 2);

    raw.write_all(head.as_bytes()).await.unwrap();
    raw.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(inbound.try_recv().is_err());

    raw.write_all(tail.as_bytes()).await.unwrap();
    raw.write_all(b"\n").await.unwrap();
    raw.flush().await.unwrap();
    assert_eq!(recv_one(&mut inbound).await, request(1));
}

#[tokio::test]
async fn undecodable_line_is_reported_and_skipped() {
    let (raw, framed) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(framed);
    let transport = StdioTransport::new(reader, writer);
    let mut inbound = collect_messages(&transport);
    let mut errors = collect_errors(&transport);
    transport.start().await.unwrap();

    let mut raw = raw;
    raw.write_all(b"this is not json\n").await.unwrap();
    let line = serde_json::to_string(&request(7)).unwrap();
    raw.write_all(line.as_bytes()).await.unwrap();
    raw.write_all(b"\n").await.unwrap();
    raw.flush().await.unwrap();

    assert!(matches!(recv_one(&mut errors).await, Error::Json(_)));
    assert_eq!(recv_one(&mut inbound).await, request(7));
}

#[tokio::test]
async fn peer_eof_closes_the_transport() {
    let (closer, observer) = duplex_transports();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    observer.on_close(Box::new(move || {
        let _ = closed_tx.send(());
    }));
    closer.start().await.unwrap();
    observer.start().await.unwrap();

    closer.close().await.unwrap();
    recv_one(&mut closed_rx).await;

    let error = observer.send(request(1)).await.unwrap_err();
    assert!(matches!(error, Error::NotConnected));
}

#[tokio::test]
async fn close_callback_fires_exactly_once() {
    let (transport, _peer) = duplex_transports();
    let closes = Arc::new(AtomicUsize::new(0));
    {
        let counter = closes.clone();
        transport.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    transport.start().await.unwrap();
    transport.close().await.unwrap();
    transport.close().await.unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn starting_twice_is_an_error() {
    let (transport, _peer) = duplex_transports();
    transport.start().await.unwrap();
    assert!(matches!(
        transport.start().await,
        Err(Error::AlreadyStarted)
    ));
}

#[tokio::test]
async fn send_before_start_is_rejected() {
    let (transport, _peer) = duplex_transports();
    let error = transport.send(request(1)).await.unwrap_err();
    assert!(matches!(error, Error::NotConnected));
}

#[tokio::test]
async fn queued_sends_are_flushed_before_close_completes() {
    let (sender, receiver) = duplex_transports();
    let mut inbound = collect_messages(&receiver);
    sender.start().await.unwrap();
    receiver.start().await.unwrap();

    for id in 0..10 {
        sender.send(request(id)).await.unwrap();
    }
    sender.close().await.unwrap();

    for id in 0..10 {
        assert_eq!(recv_one(&mut inbound).await, request(id));
    }
}

#[tokio::test]
async fn in_memory_pair_queues_messages_until_the_peer_starts() {
    let (early, late) = InMemoryTransport::create_linked_pair();
    let mut inbound = collect_messages(&late);
    early.start().await.unwrap();

    let note: JsonRpcMessage =
        JsonRpcNotification::new(Method::Initialized, Some(json!({"n": 1}))).into();
    early.send(note.clone()).await.unwrap();
    assert!(inbound.try_recv().is_err());

    late.start().await.unwrap();
    assert_eq!(recv_one(&mut inbound).await, note);
}

#[tokio::test]
async fn in_memory_close_tears_down_both_ends() {
    let (left, right) = InMemoryTransport::create_linked_pair();
    let left_closes = Arc::new(AtomicUsize::new(0));
    let right_closes = Arc::new(AtomicUsize::new(0));
    {
        let counter = left_closes.clone();
        left.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    {
        let counter = right_closes.clone();
        right.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    left.start().await.unwrap();
    right.start().await.unwrap();

    left.close().await.unwrap();
    left.close().await.unwrap();
    assert_eq!(left_closes.load(Ordering::SeqCst), 1);
    assert_eq!(right_closes.load(Ordering::SeqCst), 1);

    let error = right.send(request(1)).await.unwrap_err();
    assert!(matches!(error, Error::NotConnected));
}
