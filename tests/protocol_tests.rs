//! Integration tests for the protocol engine: correlation, timeouts,
//! cancellation, and handler dispatch over a linked in-memory pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mcp_sdk::shared::{CapabilityHooks, InMemoryTransport, Protocol, RequestOptions, Transport};
use mcp_sdk::types::{ErrorCode, JsonRpcResponse, Method, RequestId};
use mcp_sdk::{Error, Result};

/// Hooks that allow everything, for exercising the engine in isolation.
struct Permissive;

impl CapabilityHooks for Permissive {
    fn assert_capability_for_method(&self, _method: &Method) -> Result<()> {
        Ok(())
    }
    fn assert_notification_capability(&self, _method: &Method) -> Result<()> {
        Ok(())
    }
    fn assert_request_handler_capability(&self, _method: &Method) -> Result<()> {
        Ok(())
    }
}

/// Hooks that refuse request-handler registration for one method.
struct DenyHandler(&'static str);

impl CapabilityHooks for DenyHandler {
    fn assert_capability_for_method(&self, _method: &Method) -> Result<()> {
        Ok(())
    }
    fn assert_notification_capability(&self, _method: &Method) -> Result<()> {
        Ok(())
    }
    fn assert_request_handler_capability(&self, method: &Method) -> Result<()> {
        if method.as_str() == self.0 {
            Err(Error::CapabilityNotSupported {
                method: method.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connected_pair() -> (Protocol, Protocol) {
    init_tracing();
    let (a, b) = InMemoryTransport::create_linked_pair();
    let left = Protocol::new(Arc::new(Permissive));
    let right = Protocol::new(Arc::new(Permissive));
    left.connect(Arc::new(a)).await.unwrap();
    right.connect(Arc::new(b)).await.unwrap();
    (left, right)
}

/// Polls `predicate` until it holds or a second elapses.
async fn eventually(predicate: impl Fn() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not hold within one second");
}

#[tokio::test]
async fn request_resolves_with_matching_response() {
    let (caller, callee) = connected_pair().await;
    callee
        .set_request_handler(Method::Custom("echo".into()), |request, _extra| {
            Box::pin(async move { Ok(json!({ "echo": request.params })) })
        })
        .unwrap();

    let result = caller
        .request(
            Method::Custom("echo".into()),
            Some(json!({"value": 42})),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({ "echo": { "value": 42 } }));
}

#[tokio::test]
async fn concurrent_requests_correlate_by_id() {
    let (caller, callee) = connected_pair().await;
    callee
        .set_request_handler(Method::Custom("echo".into()), |request, _extra| {
            Box::pin(async move { Ok(request.params.unwrap_or_default()) })
        })
        .unwrap();

    let first = caller.request(
        Method::Custom("echo".into()),
        Some(json!("first")),
        RequestOptions::default(),
    );
    let second = caller.request(
        Method::Custom("echo".into()),
        Some(json!("second")),
        RequestOptions::default(),
    );
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap(), json!("first"));
    assert_eq!(second.unwrap(), json!("second"));
}

#[tokio::test]
async fn unhandled_request_answers_method_not_found() {
    let (caller, _callee) = connected_pair().await;
    let error = caller
        .request(
            Method::Custom("nonexistent".into()),
            None,
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
    match error {
        Error::Rpc { code, .. } => assert_eq!(code, ErrorCode::METHOD_NOT_FOUND),
        other => panic!("expected an RPC error, got {other}"),
    }
}

#[tokio::test]
async fn handler_error_becomes_error_response() {
    let (caller, callee) = connected_pair().await;
    callee
        .set_request_handler(Method::Custom("fail".into()), |_request, _extra| {
            Box::pin(async {
                Err(Error::from_rpc(
                    ErrorCode::INVALID_PARAMS,
                    "bad params",
                    Some(json!({"field": "value"})),
                ))
            })
        })
        .unwrap();

    let error = caller
        .request(Method::Custom("fail".into()), None, RequestOptions::default())
        .await
        .unwrap_err();
    match error {
        Error::Rpc {
            code,
            message,
            data,
        } => {
            assert_eq!(code, ErrorCode::INVALID_PARAMS);
            assert_eq!(message, "bad params");
            assert_eq!(data, Some(json!({"field": "value"})));
        }
        other => panic!("expected an RPC error, got {other}"),
    }
}

#[tokio::test]
async fn response_for_unknown_id_is_reported_not_fatal() {
    let (raw, peer_end) = InMemoryTransport::create_linked_pair();
    let protocol = Protocol::new(Arc::new(Permissive));

    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    protocol.on_error(Box::new(move |error| {
        let _ = error_tx.send(error);
    }));
    protocol.connect(Arc::new(peer_end)).await.unwrap();

    let raw = Arc::new(raw);
    raw.start().await.unwrap();
    raw.send(JsonRpcResponse::new(RequestId::from(999), json!({})).into())
        .await
        .unwrap();

    let reported = tokio::time::timeout(Duration::from_secs(1), error_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        reported,
        Error::UnknownResponseId(RequestId::Number(999))
    ));
}

#[tokio::test]
async fn refused_handler_registration_installs_nothing() {
    let (a, b) = InMemoryTransport::create_linked_pair();
    let gated = Protocol::new(Arc::new(DenyHandler("tools/list")));
    let caller = Protocol::new(Arc::new(Permissive));
    gated.connect(Arc::new(a)).await.unwrap();
    caller.connect(Arc::new(b)).await.unwrap();

    let registration = gated.set_request_handler(Method::ToolsList, |_request, _extra| {
        Box::pin(async { Ok(json!({})) })
    });
    assert!(matches!(
        registration,
        Err(Error::CapabilityNotSupported { .. })
    ));

    // The refused handler must not be reachable.
    let error = caller
        .request(Method::ToolsList, None, RequestOptions::default())
        .await
        .unwrap_err();
    match error {
        Error::Rpc { code, .. } => assert_eq!(code, ErrorCode::METHOD_NOT_FOUND),
        other => panic!("expected an RPC error, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn request_times_out_without_response() {
    let (caller, callee) = connected_pair().await;
    callee
        .set_request_handler(Method::Custom("slow".into()), |_request, _extra| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!({}))
            })
        })
        .unwrap();

    let error = caller
        .request(
            Method::Custom("slow".into()),
            None,
            RequestOptions::with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout));
}

#[tokio::test]
async fn late_response_after_timeout_does_not_break_later_requests() {
    let (caller, callee) = connected_pair().await;
    callee
        .set_request_handler(Method::Custom("slow".into()), |_request, _extra| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("late"))
            })
        })
        .unwrap();
    callee
        .set_request_handler(Method::Custom("fast".into()), |_request, _extra| {
            Box::pin(async { Ok(json!("fast")) })
        })
        .unwrap();

    let error = caller
        .request(
            Method::Custom("slow".into()),
            None,
            RequestOptions::with_timeout(Duration::from_millis(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout));

    // The late response for the abandoned id must not disturb new traffic.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let result = caller
        .request(
            Method::Custom("fast".into()),
            None,
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result, json!("fast"));
}

#[tokio::test]
async fn caller_cancellation_unblocks_and_reaches_the_handler() {
    let (caller, callee) = connected_pair().await;

    let observed: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let capture = observed.clone();
    callee
        .set_request_handler(Method::Custom("hang".into()), move |_request, extra| {
            *capture.lock().unwrap() = Some(extra.cancellation.clone());
            Box::pin(async {
                std::future::pending::<()>().await;
                Ok(json!({}))
            })
        })
        .unwrap();

    let token = CancellationToken::new();
    let request = tokio::spawn({
        let caller = caller.clone();
        let token = token.clone();
        async move {
            caller
                .request(
                    Method::Custom("hang".into()),
                    None,
                    RequestOptions::with_cancellation(token),
                )
                .await
        }
    });

    // Let the request reach the handler before cancelling.
    {
        let observed = observed.clone();
        eventually(move || observed.lock().unwrap().is_some()).await;
    }
    token.cancel();

    let outcome = request.await.unwrap();
    assert!(matches!(outcome, Err(Error::Cancelled)));

    // The cancellation notification must cancel the in-flight handler token.
    eventually(move || {
        observed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    })
    .await;
}

#[tokio::test]
async fn close_fails_pending_requests_and_fires_close_hook_once() {
    let (caller, callee) = connected_pair().await;
    callee
        .set_request_handler(Method::Custom("hang".into()), |_request, _extra| {
            Box::pin(async {
                std::future::pending::<()>().await;
                Ok(json!({}))
            })
        })
        .unwrap();

    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    caller.on_close(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let request = tokio::spawn({
        let caller = caller.clone();
        async move {
            caller
                .request(Method::Custom("hang".into()), None, RequestOptions::default())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    caller.close().await.unwrap();
    caller.close().await.unwrap();

    let outcome = request.await.unwrap();
    assert!(matches!(outcome, Err(Error::ConnectionClosed)));
    eventually(move || closes.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn notifications_route_to_their_handler() {
    let (sender, receiver) = connected_pair().await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    receiver
        .set_notification_handler(Method::Custom("note".into()), move |notification| {
            let seen_tx = seen_tx.clone();
            Box::pin(async move {
                let _ = seen_tx.send(notification.params);
            })
        })
        .unwrap();

    sender
        .notification(Method::Custom("note".into()), Some(json!({"n": 1})))
        .await
        .unwrap();
    sender
        .notification(Method::Custom("unhandled".into()), None)
        .await
        .unwrap();
    sender
        .notification(Method::Custom("note".into()), Some(json!({"n": 2})))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, Some(json!({"n": 1})));
    assert_eq!(second, Some(json!({"n": 2})));
}
