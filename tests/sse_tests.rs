//! SSE client transport behavior against a live in-process HTTP server:
//! the endpoint barrier, event-name handling and the POST send path.

#![cfg(feature = "transport-sse")]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::stream;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use mcp_sdk::client::SseClientTransport;
use mcp_sdk::shared::Transport;
use mcp_sdk::types::{JsonRpcMessage, JsonRpcNotification, Method};

fn note(n: i64) -> JsonRpcMessage {
    JsonRpcNotification::new(Method::Initialized, Some(json!({"n": n}))).into()
}

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

async fn recv_one<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed")
}

/// Serves `GET /sse` streaming the given (name, data) events and holding the
/// stream open, and `POST /messages` forwarding each body to the returned
/// channel.
async fn serve(events: Vec<(String, String)>) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let (posted_tx, posted_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/sse",
            get(move || {
                let events = events.clone();
                async move {
                    let stream = stream::iter(events.into_iter().map(|(name, data)| {
                        Ok::<_, Infallible>(Event::default().event(name).data(data))
                    }))
                    .chain(stream::pending());
                    Sse::new(stream)
                }
            }),
        )
        .route(
            "/messages",
            post(move |body: String| {
                let posted_tx = posted_tx.clone();
                async move {
                    let _ = posted_tx.send(body);
                    (StatusCode::ACCEPTED, "Accepted")
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, posted_rx)
}

#[tokio::test]
async fn envelopes_are_dispatched_whatever_the_event_name() {
    let (addr, _posted) = serve(vec![
        ("endpoint".into(), "/messages?sessionId=abc".into()),
        (
            // A server is free to name its message events; the payload is
            // still a JSON-RPC envelope.
            "mcp-note".into(),
            serde_json::to_string(&note(1)).unwrap(),
        ),
        ("message".into(), serde_json::to_string(&note(2)).unwrap()),
    ])
    .await;

    let transport = SseClientTransport::new(&format!("http://{addr}/sse")).unwrap();
    let mut inbound = collect_messages(&transport);
    transport.start().await.unwrap();

    assert_eq!(recv_one(&mut inbound).await, note(1));
    assert_eq!(recv_one(&mut inbound).await, note(2));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn start_resolves_the_endpoint_and_send_posts_to_it() {
    let (addr, mut posted) = serve(vec![(
        "endpoint".into(),
        "/messages?sessionId=abc".into(),
    )])
    .await;

    let transport = SseClientTransport::new(&format!("http://{addr}/sse")).unwrap();
    transport.start().await.unwrap();
    assert_eq!(
        transport.endpoint().unwrap().as_str(),
        format!("http://{addr}/messages?sessionId=abc")
    );

    transport.send(note(7)).await.unwrap();
    let body = recv_one(&mut posted).await;
    let decoded: JsonRpcMessage = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded, note(7));
    transport.close().await.unwrap();
}
