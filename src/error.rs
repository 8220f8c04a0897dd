//! Error types for the MCP SDK.
//!
//! This module defines the error taxonomy shared by the protocol engine and
//! all transports. Per-message failures (frame decode, handler errors) are
//! surfaced through transport error callbacks and never tear down the
//! connection on their own; I/O failures at the transport layer are terminal.

use thiserror::Error;

use crate::types::{ErrorCode, RequestId};

/// A specialized Result type for MCP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors that can occur during MCP protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport was started more than once
    #[error("Transport already started")]
    AlreadyStarted,

    /// The transport is not started or already closed
    #[error("Not connected")]
    NotConnected,

    /// The connection closed while requests were still outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// IO error during read/write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be decoded as a JSON-RPC message
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The WebSocket handshake negotiated an unexpected sub-protocol
    #[error("Unsupported sub-protocol: expected \"mcp\", got {0:?}")]
    UnsupportedSubprotocol(Option<String>),

    /// A capability required for the method is not available
    #[error("Capability not supported (required for {method})")]
    CapabilityNotSupported {
        /// The method that required the missing capability
        method: String,
    },

    /// The peer answered a request with a JSON-RPC error
    #[error("RPC error {}: {message}", code.0)]
    Rpc {
        /// The JSON-RPC error code
        code: ErrorCode,
        /// A short description of the error
        message: String,
        /// Additional error information, if any
        data: Option<serde_json::Value>,
    },

    /// The request deadline elapsed before a response arrived
    #[error("Request timed out")]
    Timeout,

    /// The request was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// A response arrived whose id matches no pending request
    #[error("Received a response for an unknown request id: {0}")]
    UnknownResponseId(RequestId),

    /// The peer chose a protocol version outside the supported set
    #[error("Server's protocol version is not supported: {0}")]
    UnsupportedProtocolVersion(String),

    /// Transport-level failure with a descriptive message
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP error from the SSE client transport
    #[cfg(feature = "transport-sse")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol error
    #[cfg(feature = "transport-ws")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Builds the `Rpc` variant from the members of a wire-level error response.
    pub fn from_rpc(code: ErrorCode, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Error::Rpc {
            code,
            message: message.into(),
            data,
        }
    }
}
