//! WebSocket client connector.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tracing::debug;

use crate::error::{Error, Result};
use crate::shared::websocket::{WebSocketTransport, MCP_SUBPROTOCOL};

/// A [`WebSocketTransport`] established by dialing out to a server.
pub type WebSocketClientTransport = WebSocketTransport<MaybeTlsStream<TcpStream>>;

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    /// Dials `url` (a `ws://` or `wss://` URL), offering the `mcp`
    /// sub-protocol, and verifies the server accepted it.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(MCP_SUBPROTOCOL));

        debug!(url, "connecting websocket transport");
        let (session, response) = connect_async(request).await?;

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok());
        if negotiated != Some(MCP_SUBPROTOCOL) {
            return Err(Error::UnsupportedSubprotocol(
                negotiated.map(str::to_string),
            ));
        }

        Ok(WebSocketTransport::new(session))
    }
}
