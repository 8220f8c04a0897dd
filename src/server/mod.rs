//! The server role.
//!
//! A [`Server`] wraps the protocol engine with the responding side of the
//! initialize handshake. The `initialize` and `notifications/initialized`
//! handlers are registered at construction, so a transport can be connected
//! and a client served with no further setup.

#[cfg(feature = "transport-sse")]
pub mod sse;
#[cfg(feature = "transport-ws")]
pub mod websocket;

#[cfg(feature = "transport-sse")]
pub use sse::{sse_router, SseServerTransport};
#[cfg(feature = "transport-ws")]
pub use websocket::accept_websocket;

use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::shared::protocol::{CapabilityHooks, Protocol, RequestHandlerExtra, RequestOptions};
use crate::shared::transport::Transport;
use crate::types::{
    ClientCapabilities, ErrorCode, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, Method, ServerCapabilities, LATEST_PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Options for constructing a [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// The capabilities this server advertises during the handshake.
    pub capabilities: ServerCapabilities,
}

struct ServerHooks {
    capabilities: ServerCapabilities,
    client_capabilities: Arc<RwLock<Option<ClientCapabilities>>>,
}

impl CapabilityHooks for ServerHooks {
    fn assert_capability_for_method(&self, method: &Method) -> Result<()> {
        let Some(required) = method.required_client_capability() else {
            return Ok(());
        };
        let guard = self
            .client_capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(capabilities) if capabilities.supports(required) => Ok(()),
            _ => Err(Error::CapabilityNotSupported {
                method: method.to_string(),
            }),
        }
    }

    fn assert_notification_capability(&self, method: &Method) -> Result<()> {
        match method.required_capability_on_server() {
            Some(required) if !self.capabilities.supports(required) => {
                Err(Error::CapabilityNotSupported {
                    method: method.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn assert_request_handler_capability(&self, method: &Method) -> Result<()> {
        match method.required_capability_on_server() {
            Some(required) if !self.capabilities.supports(required) => {
                Err(Error::CapabilityNotSupported {
                    method: method.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

type InitializedHook = Box<dyn Fn() + Send + Sync>;

/// An MCP server.
///
/// One `Server` serves one connection; spin up a fresh instance per session
/// when accepting many clients.
pub struct Server {
    protocol: Protocol,
    info: Implementation,
    capabilities: ServerCapabilities,
    client_capabilities: Arc<RwLock<Option<ClientCapabilities>>>,
    client_info: Arc<RwLock<Option<Implementation>>>,
    initialized_hook: Arc<RwLock<Option<InitializedHook>>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server identifying itself as `info`, with the handshake
    /// handlers already registered.
    pub fn new(info: Implementation, options: ServerOptions) -> Result<Self> {
        let client_capabilities: Arc<RwLock<Option<ClientCapabilities>>> =
            Arc::new(RwLock::new(None));
        let client_info: Arc<RwLock<Option<Implementation>>> = Arc::new(RwLock::new(None));
        let initialized_hook: Arc<RwLock<Option<InitializedHook>>> = Arc::new(RwLock::new(None));

        let hooks = ServerHooks {
            capabilities: options.capabilities.clone(),
            client_capabilities: client_capabilities.clone(),
        };
        let protocol = Protocol::new(Arc::new(hooks));

        {
            let capabilities = options.capabilities.clone();
            let server_info = info.clone();
            let client_capabilities = client_capabilities.clone();
            let client_info = client_info.clone();
            protocol.set_request_handler(Method::Initialize, move |request, _extra| {
                let capabilities = capabilities.clone();
                let server_info = server_info.clone();
                let client_capabilities = client_capabilities.clone();
                let client_info = client_info.clone();
                Box::pin(async move {
                    let params: InitializeParams =
                        serde_json::from_value(request.params.unwrap_or_default()).map_err(
                            |error| {
                                Error::from_rpc(ErrorCode::INVALID_PARAMS, error.to_string(), None)
                            },
                        )?;
                    info!(
                        client = %params.client_info.name,
                        requested = %params.protocol_version,
                        "initialize request"
                    );

                    // Echo a supported requested version; otherwise answer
                    // with the latest we speak and let the client decide.
                    let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS
                        .contains(&params.protocol_version.as_str())
                    {
                        params.protocol_version.clone()
                    } else {
                        LATEST_PROTOCOL_VERSION.to_string()
                    };

                    *client_capabilities
                        .write()
                        .unwrap_or_else(|e| e.into_inner()) = Some(params.capabilities);
                    *client_info.write().unwrap_or_else(|e| e.into_inner()) =
                        Some(params.client_info);

                    let result = InitializeResult {
                        protocol_version,
                        capabilities,
                        server_info,
                    };
                    Ok(serde_json::to_value(result)?)
                })
            })?;
        }

        {
            let hook = initialized_hook.clone();
            protocol.set_notification_handler(Method::Initialized, move |_notification| {
                let hook = hook.clone();
                Box::pin(async move {
                    let guard = hook.read().unwrap_or_else(|e| e.into_inner());
                    if let Some(hook) = guard.as_ref() {
                        hook();
                    }
                })
            })?;
        }

        protocol.set_request_handler(Method::Ping, |_request, _extra| {
            Box::pin(async { Ok(json!({})) })
        })?;

        Ok(Self {
            protocol,
            info,
            capabilities: options.capabilities,
            client_capabilities,
            client_info,
            initialized_hook,
        })
    }

    /// Connects over `transport` and serves until the connection closes.
    ///
    /// For session-scoped transports such as SSE this suspends for the whole
    /// session; run it in its own task when accepting multiple clients.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.protocol.connect(transport).await
    }

    /// Installs a hook fired when the client reports itself initialized.
    pub fn on_initialized(&self, hook: InitializedHook) {
        *self
            .initialized_hook
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// The capabilities the client declared, once the handshake has run.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client_capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The client's identity, once the handshake has run.
    pub fn client_version(&self) -> Option<Implementation> {
        self.client_info
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

    /// Sends a server-to-client request such as `sampling/createMessage`.
    /// Gated on the capabilities the client declared.
    pub async fn request(
        &self,
        method: Method,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value> {
        self.protocol.request(method, params, options).await
    }

    /// Sends a notification. Gated on this server's advertised capabilities,
    /// so a server that never declared `logging` cannot emit
    /// `notifications/message`.
    pub async fn notification(
        &self,
        method: Method,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        self.protocol.notification(method, params).await
    }

    /// Registers a request handler, checked against this server's advertised
    /// capabilities at registration time.
    pub fn set_request_handler<F>(&self, method: Method, handler: F) -> Result<()>
    where
        F: Fn(JsonRpcRequest, RequestHandlerExtra) -> BoxFuture<'static, Result<serde_json::Value>>
            + Send
            + Sync
            + 'static,
    {
        self.protocol.set_request_handler(method, handler)
    }

    /// Registers a notification handler.
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
