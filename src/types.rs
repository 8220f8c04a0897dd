//! # MCP Protocol Types
//!
//! Core types used throughout the MCP SDK: the JSON-RPC message envelope,
//! request identifiers, the closed method enumeration, capability sets, and
//! the initialize handshake payloads.
//!
//! ## Message envelope
//!
//! A [`JsonRpcMessage`] is one of four shapes:
//!
//! - [`JsonRpcRequest`]: has both `method` and `id`, expects a reply
//! - [`JsonRpcNotification`]: has `method` but no `id`, fire-and-forget
//! - [`JsonRpcResponse`]: has `id` and `result`
//! - [`JsonRpcError`]: has `id` and `error`
//!
//! Decoding selects the variant by inspecting which keys are present, in
//! exactly that order. The precedence is part of the wire contract: a message
//! carrying both `method` and `id` is always a request, a `method` without an
//! `id` is always a notification, and only id-correlated replies remain.

use std::collections::HashMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The latest protocol revision this SDK speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2024-11-05";

/// All protocol revisions this SDK accepts from a peer.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[LATEST_PROTOCOL_VERSION, "2024-10-07"];

/// The JSON-RPC version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request identifier: a number or a string, chosen by the request sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A JSON-RPC error code.
///
/// Serializes as a bare integer. The associated constants cover the codes
/// defined by JSON-RPC 2.0 plus the SDK-specific codes used for connection
/// teardown and request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
    /// The connection closed before the request completed
    pub const CONNECTION_CLOSED: ErrorCode = ErrorCode(-32000);
    /// The request deadline elapsed
    pub const REQUEST_TIMEOUT: ErrorCode = ErrorCode(-32001);
    /// The message was not valid JSON
    pub const PARSE_ERROR: ErrorCode = ErrorCode(-32700);
    /// The message was not a valid request envelope
    pub const INVALID_REQUEST: ErrorCode = ErrorCode(-32600);
    /// No handler is registered for the requested method
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode(-32601);
    /// The request parameters were invalid for the method
    pub const INVALID_PARAMS: ErrorCode = ErrorCode(-32602);
    /// The handler failed while processing the request
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(-32603);
}

/// A capability a server may advertise, required by certain client calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCapability {
    /// `logging` capability
    Logging,
    /// `prompts` capability
    Prompts,
    /// `resources` capability
    Resources,
    /// `resources` capability with `subscribe` enabled
    ResourceSubscribe,
    /// `tools` capability
    Tools,
}

/// A capability a client may advertise, required by certain server calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCapability {
    /// `sampling` capability
    Sampling,
    /// `roots` capability
    Roots,
    /// `roots` capability with `listChanged` enabled
    RootsListChanged,
}

/// The closed set of MCP methods, plus an escape hatch for extensions.
///
/// Each defined method knows which negotiated capability it requires; the
/// capability hooks in the client and server roles consult that data instead
/// of switching on raw strings. Serializes as the wire method string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `ping`
    Ping,
    /// `notifications/initialized`
    Initialized,
    /// `notifications/cancelled`
    Cancelled,
    /// `notifications/progress`
    Progress,
    /// `tools/list`
    ToolsList,
    /// `tools/call`
    ToolsCall,
    /// `notifications/tools/list_changed`
    ToolsListChanged,
    /// `prompts/list`
    PromptsList,
    /// `prompts/get`
    PromptsGet,
    /// `notifications/prompts/list_changed`
    PromptsListChanged,
    /// `resources/list`
    ResourcesList,
    /// `resources/read`
    ResourcesRead,
    /// `resources/subscribe`
    ResourcesSubscribe,
    /// `resources/unsubscribe`
    ResourcesUnsubscribe,
    /// `resources/templates/list`
    ResourcesTemplatesList,
    /// `notifications/resources/updated`
    ResourcesUpdated,
    /// `notifications/resources/list_changed`
    ResourcesListChanged,
    /// `completion/complete`
    CompletionComplete,
    /// `logging/setLevel`
    LoggingSetLevel,
    /// `notifications/message`
    LoggingMessage,
    /// `sampling/createMessage`
    SamplingCreateMessage,
    /// `roots/list`
    RootsList,
    /// `notifications/roots/list_changed`
    RootsListChanged,
    /// Any method outside the defined set
    Custom(String),
}

impl Method {
    /// The wire representation of this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Initialize => "initialize",
            Method::Ping => "ping",
            Method::Initialized => "notifications/initialized",
            Method::Cancelled => "notifications/cancelled",
            Method::Progress => "notifications/progress",
            Method::ToolsList => "tools/list",
            Method::ToolsCall => "tools/call",
            Method::ToolsListChanged => "notifications/tools/list_changed",
            Method::PromptsList => "prompts/list",
            Method::PromptsGet => "prompts/get",
            Method::PromptsListChanged => "notifications/prompts/list_changed",
            Method::ResourcesList => "resources/list",
            Method::ResourcesRead => "resources/read",
            Method::ResourcesSubscribe => "resources/subscribe",
            Method::ResourcesUnsubscribe => "resources/unsubscribe",
            Method::ResourcesTemplatesList => "resources/templates/list",
            Method::ResourcesUpdated => "notifications/resources/updated",
            Method::ResourcesListChanged => "notifications/resources/list_changed",
            Method::CompletionComplete => "completion/complete",
            Method::LoggingSetLevel => "logging/setLevel",
            Method::LoggingMessage => "notifications/message",
            Method::SamplingCreateMessage => "sampling/createMessage",
            Method::RootsList => "roots/list",
            Method::RootsListChanged => "notifications/roots/list_changed",
            Method::Custom(s) => s,
        }
    }

    /// The server capability a client must see advertised before calling this
    /// method. `None` means no negotiated capability is required.
    pub fn required_server_capability(&self) -> Option<ServerCapability> {
        match self {
            Method::LoggingSetLevel => Some(ServerCapability::Logging),
            Method::PromptsList | Method::PromptsGet | Method::CompletionComplete => {
                Some(ServerCapability::Prompts)
            }
            Method::ResourcesList
            | Method::ResourcesRead
            | Method::ResourcesUnsubscribe
            | Method::ResourcesTemplatesList => Some(ServerCapability::Resources),
            Method::ResourcesSubscribe => Some(ServerCapability::ResourceSubscribe),
            Method::ToolsList | Method::ToolsCall => Some(ServerCapability::Tools),
            _ => None,
        }
    }

    /// The client capability required to register a handler for (or emit) this
    /// method on the client side.
    pub fn required_client_capability(&self) -> Option<ClientCapability> {
        match self {
            Method::SamplingCreateMessage => Some(ClientCapability::Sampling),
            Method::RootsList => Some(ClientCapability::Roots),
            Method::RootsListChanged => Some(ClientCapability::RootsListChanged),
            _ => None,
        }
    }

    /// The server capability required to register a handler for (or emit) this
    /// method on the server side.
    pub fn required_capability_on_server(&self) -> Option<ServerCapability> {
        match self {
            Method::LoggingMessage => Some(ServerCapability::Logging),
            Method::PromptsList
            | Method::PromptsGet
            | Method::PromptsListChanged
            | Method::CompletionComplete => Some(ServerCapability::Prompts),
            Method::ResourcesList
            | Method::ResourcesRead
            | Method::ResourcesSubscribe
            | Method::ResourcesUnsubscribe
            | Method::ResourcesTemplatesList
            | Method::ResourcesUpdated
            | Method::ResourcesListChanged => Some(ServerCapability::Resources),
            Method::ToolsList | Method::ToolsCall | Method::ToolsListChanged => {
                Some(ServerCapability::Tools)
            }
            _ => None,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "initialize" => Method::Initialize,
            "ping" => Method::Ping,
            "notifications/initialized" => Method::Initialized,
            "notifications/cancelled" => Method::Cancelled,
            "notifications/progress" => Method::Progress,
            "tools/list" => Method::ToolsList,
            "tools/call" => Method::ToolsCall,
            "notifications/tools/list_changed" => Method::ToolsListChanged,
            "prompts/list" => Method::PromptsList,
            "prompts/get" => Method::PromptsGet,
            "notifications/prompts/list_changed" => Method::PromptsListChanged,
            "resources/list" => Method::ResourcesList,
            "resources/read" => Method::ResourcesRead,
            "resources/subscribe" => Method::ResourcesSubscribe,
            "resources/unsubscribe" => Method::ResourcesUnsubscribe,
            "resources/templates/list" => Method::ResourcesTemplatesList,
            "notifications/resources/updated" => Method::ResourcesUpdated,
            "notifications/resources/list_changed" => Method::ResourcesListChanged,
            "completion/complete" => Method::CompletionComplete,
            "logging/setLevel" => Method::LoggingSetLevel,
            "notifications/message" => Method::LoggingMessage,
            "sampling/createMessage" => Method::SamplingCreateMessage,
            "roots/list" => Method::RootsList,
            "notifications/roots/list_changed" => Method::RootsListChanged,
            other => Method::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Method::from(s.as_str()))
    }
}

/// A JSON-RPC request: expects exactly one response or error with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Sender-chosen id, unique among this sender's outstanding requests
    pub id: RequestId,
    /// The method to invoke
    pub method: Method,
    /// Method parameters, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Creates a request envelope for the given method, parameters and id.
    pub fn new(method: Method, params: Option<serde_json::Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC notification: no id, never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always "2.0"
    pub jsonrpc: String,
    /// The notification method
    pub method: Method,
    /// Notification parameters, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Creates a notification envelope for the given method and parameters.
    pub fn new(method: Method, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params,
        }
    }
}

/// A successful JSON-RPC response, correlated to a request by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// The id of the request this answers
    pub id: RequestId,
    /// The method result
    pub result: serde_json::Value,
}

impl JsonRpcResponse {
    /// Creates a response envelope carrying `result` for request `id`.
    pub fn new(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// The error member of a [`JsonRpcError`] envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error code
    pub code: ErrorCode,
    /// A short description of the error
    pub message: String,
    /// Additional information, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC error response, correlated to a request by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Always "2.0"
    pub jsonrpc: String,
    /// The id of the request this answers
    pub id: RequestId,
    /// The error that terminated the request
    pub error: ErrorObject,
}

impl JsonRpcError {
    /// Creates an error envelope for request `id`.
    pub fn new(id: RequestId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        }
    }
}

/// One JSON-RPC envelope: request, notification, response or error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a reply
    Request(JsonRpcRequest),
    /// A fire-and-forget notification
    Notification(JsonRpcNotification),
    /// A successful response
    Response(JsonRpcResponse),
    /// An error response
    Error(JsonRpcError),
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| D::Error::custom("JSON-RPC message must be an object"))?;

        // Shape predicates, in contract order: method+id is a request, method
        // alone is a notification, then id-correlated error or response.
        let message = if obj.contains_key("method") {
            if obj.contains_key("id") {
                JsonRpcMessage::Request(
                    serde_json::from_value(value).map_err(D::Error::custom)?,
                )
            } else {
                JsonRpcMessage::Notification(
                    serde_json::from_value(value).map_err(D::Error::custom)?,
                )
            }
        } else if obj.contains_key("error") {
            JsonRpcMessage::Error(serde_json::from_value(value).map_err(D::Error::custom)?)
        } else if obj.contains_key("id") {
            JsonRpcMessage::Response(serde_json::from_value(value).map_err(D::Error::custom)?)
        } else {
            return Err(D::Error::custom(
                "JSON-RPC message has neither method, error nor id",
            ));
        };
        Ok(message)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(request)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(notification)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(response)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(error: JsonRpcError) -> Self {
        JsonRpcMessage::Error(error)
    }
}

/// Name and version of a client or server implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Creates an implementation descriptor.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// The `roots` member of [`ClientCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    /// Whether the client emits `notifications/roots/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities a client declares during the initialize handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
    /// Support for LLM sampling requests from the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
    /// Support for filesystem roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
}

impl ClientCapabilities {
    /// Whether this capability set satisfies `capability`.
    pub fn supports(&self, capability: ClientCapability) -> bool {
        match capability {
            ClientCapability::Sampling => self.sampling.is_some(),
            ClientCapability::Roots => self.roots.is_some(),
            ClientCapability::RootsListChanged => self
                .roots
                .as_ref()
                .is_some_and(|roots| roots.list_changed == Some(true)),
        }
    }
}

/// The `prompts` member of [`ServerCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    /// Whether the server emits `notifications/prompts/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// The `resources` member of [`ServerCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether the server supports `resources/subscribe`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Whether the server emits `notifications/resources/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// The `tools` member of [`ServerCapabilities`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the server emits `notifications/tools/list_changed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capabilities a server declares during the initialize handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, serde_json::Value>>,
    /// Support for `logging/setLevel` and log message notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    /// Support for prompt listing and retrieval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    /// Support for resource listing, reading and subscriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Support for tool listing and invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

impl ServerCapabilities {
    /// Whether this capability set satisfies `capability`.
    pub fn supports(&self, capability: ServerCapability) -> bool {
        match capability {
            ServerCapability::Logging => self.logging.is_some(),
            ServerCapability::Prompts => self.prompts.is_some(),
            ServerCapability::Resources => self.resources.is_some(),
            ServerCapability::ResourceSubscribe => self
                .resources
                .as_ref()
                .is_some_and(|resources| resources.subscribe == Some(true)),
            ServerCapability::Tools => self.tools.is_some(),
        }
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wants to speak
    pub protocol_version: String,
    /// The client's capability set
    pub capabilities: ClientCapabilities,
    /// The client's identity
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The protocol version the server chose
    pub protocol_version: String,
    /// The server's capability set
    pub capabilities: ServerCapabilities,
    /// The server's identity
    pub server_info: Implementation,
}

/// Parameters of the `notifications/cancelled` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// The id of the request being cancelled
    pub request_id: RequestId,
    /// An optional human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(message: JsonRpcMessage) {
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: JsonRpcMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn roundtrip_request_with_string_id() {
        roundtrip(JsonRpcMessage::Request(JsonRpcRequest::new(
            Method::ToolsCall,
            Some(json!({"name": "echo"})),
            RequestId::from("abc"),
        )));
    }

    #[test]
    fn roundtrip_request_with_numeric_id() {
        roundtrip(JsonRpcMessage::Request(JsonRpcRequest::new(
            Method::Ping,
            None,
            RequestId::from(7),
        )));
    }

    #[test]
    fn roundtrip_notification() {
        roundtrip(JsonRpcMessage::Notification(JsonRpcNotification::new(
            Method::Initialized,
            None,
        )));
    }

    #[test]
    fn roundtrip_response() {
        roundtrip(JsonRpcMessage::Response(JsonRpcResponse::new(
            RequestId::from(1),
            json!({"ok": true}),
        )));
    }

    #[test]
    fn roundtrip_error() {
        roundtrip(JsonRpcMessage::Error(JsonRpcError::new(
            RequestId::from("x"),
            ErrorCode::METHOD_NOT_FOUND,
            "Method not found",
        )));
    }

    #[test]
    fn decode_selects_request_over_response() {
        // An envelope with both method and id must decode as a request even
        // though it also satisfies the response predicate structurally.
        let decoded: JsonRpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        )
        .unwrap();
        assert!(matches!(decoded, JsonRpcMessage::Request(_)));
    }

    #[test]
    fn decode_initialize_result_response() {
        let message = r#"{"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{"listChanged":true},"resources":{}},"serverInfo":{"name":"jetbrains/proxy","version":"0.1.0"}},"jsonrpc":"2.0","id":1}"#;
        let decoded: JsonRpcMessage = serde_json::from_str(message).unwrap();
        let JsonRpcMessage::Response(response) = decoded else {
            panic!("expected a response");
        };
        let result: InitializeResult = serde_json::from_value(response.result).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert!(result.capabilities.supports(ServerCapability::Tools));
        assert!(result.capabilities.supports(ServerCapability::Resources));
        assert!(!result.capabilities.supports(ServerCapability::ResourceSubscribe));
        assert_eq!(result.server_info.name, "jetbrains/proxy");
    }

    #[test]
    fn empty_capabilities_serialize_to_empty_object() {
        assert_eq!(
            serde_json::to_value(ServerCapabilities::default()).unwrap(),
            json!({})
        );
        assert_eq!(
            serde_json::to_value(ClientCapabilities::default()).unwrap(),
            json!({})
        );
    }

    #[test]
    fn custom_method_roundtrips() {
        let method = Method::from("x/experimental");
        assert_eq!(method, Method::Custom("x/experimental".to_string()));
        assert_eq!(serde_json::to_value(&method).unwrap(), json!("x/experimental"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(serde_json::from_str::<JsonRpcMessage>(r#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(serde_json::from_str::<JsonRpcMessage>("[1,2]").is_err());
    }
}
