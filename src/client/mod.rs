//! The client role.
//!
//! A [`Client`] wraps the protocol engine with the initiating side of the
//! initialize handshake and client-side capability gating: requests that
//! need a server capability are refused until the server has advertised it,
//! which also means every such call fails before the handshake completes.

#[cfg(feature = "transport-sse")]
pub mod sse;
#[cfg(feature = "transport-ws")]
pub mod websocket;

#[cfg(feature = "transport-sse")]
pub use sse::SseClientTransport;
#[cfg(feature = "transport-ws")]
pub use websocket::WebSocketClientTransport;

use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::shared::protocol::{CapabilityHooks, Protocol, RequestHandlerExtra, RequestOptions};
use crate::shared::transport::Transport;
use crate::types::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, Method, ServerCapabilities, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Options for constructing a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// The capabilities this client advertises during the handshake.
    pub capabilities: ClientCapabilities,
}

struct ClientHooks {
    capabilities: ClientCapabilities,
    server_capabilities: Arc<RwLock<Option<ServerCapabilities>>>,
}

impl CapabilityHooks for ClientHooks {
    fn assert_capability_for_method(&self, method: &Method) -> Result<()> {
        let Some(required) = method.required_server_capability() else {
            return Ok(());
        };
        let guard = self
            .server_capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner());
        // No recorded set means the handshake has not completed yet; a gated
        // call must fail rather than race it.
        match guard.as_ref() {
            Some(capabilities) if capabilities.supports(required) => Ok(()),
            _ => Err(Error::CapabilityNotSupported {
                method: method.to_string(),
            }),
        }
    }

    fn assert_notification_capability(&self, method: &Method) -> Result<()> {
        match method.required_client_capability() {
            Some(required) if !self.capabilities.supports(required) => {
                Err(Error::CapabilityNotSupported {
                    method: method.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn assert_request_handler_capability(&self, method: &Method) -> Result<()> {
        match method.required_client_capability() {
            Some(required) if !self.capabilities.supports(required) => {
                Err(Error::CapabilityNotSupported {
                    method: method.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// An MCP client.
///
/// Construct with [`Client::new`], then [`connect`](Client::connect) it over
/// any [`Transport`]; the handshake runs before `connect` returns.
pub struct Client {
    protocol: Protocol,
    info: Implementation,
    capabilities: ClientCapabilities,
    server_capabilities: Arc<RwLock<Option<ServerCapabilities>>>,
    server_info: Arc<RwLock<Option<Implementation>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client identifying itself as `info`.
    pub fn new(info: Implementation, options: ClientOptions) -> Result<Self> {
        let server_capabilities = Arc::new(RwLock::new(None));
        let hooks = ClientHooks {
            capabilities: options.capabilities.clone(),
            server_capabilities: server_capabilities.clone(),
        };
        let protocol = Protocol::new(Arc::new(hooks));

        // Either side may ping the other at any time.
        protocol.set_request_handler(Method::Ping, |_request, _extra| {
            Box::pin(async { Ok(json!({})) })
        })?;

        Ok(Self {
            protocol,
            info,
            capabilities: options.capabilities,
            server_capabilities,
            server_info: Arc::new(RwLock::new(None)),
        })
    }

    /// Connects over `transport` and performs the initialize handshake.
    ///
    /// On success the server's capabilities and identity are recorded and
    /// `notifications/initialized` has been sent. If the server answers with
    /// a protocol version outside the supported set, the transport is closed
    /// and [`Error::UnsupportedProtocolVersion`] is returned.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.protocol.connect(transport).await?;

        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.info.clone(),
        };
        let handshake = async {
            let value = self
                .protocol
                .request(
                    Method::Initialize,
                    Some(serde_json::to_value(&params)?),
                    RequestOptions::default(),
                )
                .await?;
            let result: InitializeResult = serde_json::from_value(value)?;
            if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
                return Err(Error::UnsupportedProtocolVersion(result.protocol_version));
            }
            Ok(result)
        };

        let result = match handshake.await {
            Ok(result) => result,
            Err(error) => {
                // Nothing sensible can follow a failed handshake.
                let _ = self.protocol.close().await;
                return Err(error);
            }
        };

        info!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "initialize handshake complete"
        );
        *self
            .server_capabilities
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(result.capabilities);
        *self.server_info.write().unwrap_or_else(|e| e.into_inner()) =
            Some(result.server_info);

        self.protocol.notification(Method::Initialized, None).await
    }

    /// The capabilities the server advertised, once connected.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The server's identity, once connected.
    pub fn server_version(&self) -> Option<Implementation> {
        self.server_info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sends a `ping` and waits for the pong.
    pub async fn ping(&self) -> Result<()> {
        self.protocol
            .request(Method::Ping, None, RequestOptions::default())
            .await
            .map(|_| ())
    }

    /// Sends a request through the underlying engine.
    pub async fn request(
        &self,
        method: Method,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value> {
        self.protocol.request(method, params, options).await
    }

    /// Sends a notification through the underlying engine.
    pub async fn notification(
        &self,
        method: Method,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.protocol.notification(method, params).await
    }

    /// Registers a handler for server-to-client requests such as
    /// `sampling/createMessage`. Fails when this client's advertised
    /// capabilities do not cover the method.
    pub fn set_request_handler<F>(&self, method: Method, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        self.protocol.set_request_handler(method, handler)
    }

    /// Registers a handler for server-to-client notifications.
    pub fn set_notification_handler<F>(&self, method: Method, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcNotification) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.protocol.set_notification_handler(method, handler)
    }

    /// Installs a hook fired exactly once when the connection closes.
    pub fn on_close(&self, hook: Box<dyn FnOnce() + Send>) {
        self.protocol.on_close(hook);
    }

    /// Installs a hook for out-of-band errors.
    pub fn on_error(&self, hook: Box<dyn Fn(Error) + Send + Sync>) {
        self.protocol.on_error(hook);
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<()> {
        self.protocol.close().await
    }
}
