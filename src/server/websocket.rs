//! WebSocket server acceptor.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::debug;

use crate::error::{Error, Result};
use crate::shared::websocket::{WebSocketTransport, MCP_SUBPROTOCOL};

/// Performs the server side of the WebSocket handshake over `stream`.
///
/// The handshake is rejected outright unless the client offered the `mcp`
/// sub-protocol, so no frame is ever processed on a connection that
/// negotiated the wrong token.
pub async fn accept_websocket<S>(stream: S) -> Result<WebSocketTransport<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let offered: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen = offered.clone();

    let callback = move |request: &Request, mut response: Response| {
        let protocols = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok());
        *seen.lock().unwrap_or_else(|e| e.into_inner()) = protocols.map(str::to_string);

        let matched = protocols
            .map(|list| list.split(',').any(|token| token.trim() == MCP_SUBPROTOCOL))
            .unwrap_or(false);
        if matched {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(MCP_SUBPROTOCOL));
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(None);
            *rejection.status_mut() = StatusCode::BAD_REQUEST;
            Err(rejection)
        }
    };

    match accept_hdr_async(stream, callback).await {
        Ok(session) => {
            debug!("accepted websocket session with {} sub-protocol", MCP_SUBPROTOCOL);
            Ok(WebSocketTransport::new(session))
        }
        Err(tokio_tungstenite::tungstenite::Error::Http(_)) => {
            let token = offered.lock().unwrap_or_else(|e| e.into_inner()).take();
            Err(Error::UnsupportedSubprotocol(token))
        }
        Err(error) => Err(error.into()),
    }
}
