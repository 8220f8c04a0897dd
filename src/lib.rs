#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_html_tags)]
#![deny(rustdoc::bare_urls)]

//! A Rust SDK for the Model Context Protocol (MCP).
//!
//! This crate provides the JSON-RPC machinery both sides of an MCP
//! connection share: typed envelopes, a protocol engine handling request
//! correlation, timeouts, cancellation and capability-gated dispatch, the
//! [`Client`] and [`Server`] roles with the initialize handshake, and a set
//! of interchangeable transports (stdio, in-memory, SSE, WebSocket).
//!
//! ## Basic usage
//!
//! A server over stdio:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mcp_sdk::shared::StdioTransport;
//! use mcp_sdk::types::{Implementation, Method};
//! use mcp_sdk::{Server, ServerOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> mcp_sdk::Result<()> {
//!     let server = Server::new(
//!         Implementation::new("example-server", "0.1.0"),
//!         ServerOptions::default(),
//!     )?;
//!     server.set_request_handler(Method::Custom("echo".into()), |request, _extra| {
//!         Box::pin(async move { Ok(json!({ "params": request.params })) })
//!     })?;
//!     server.connect(Arc::new(StdioTransport::stdio())).await
//! }
//! ```
//!
//! A client drives the same engine from the other side: construct a
//! [`Client`], connect it over any [`Transport`], and the initialize
//! handshake completes before `connect` returns.

pub mod client;
pub mod error;
pub mod server;
pub mod shared;
pub mod types;

pub use client::{Client, ClientOptions};
pub use error::{Error, Result};
pub use server::{Server, ServerOptions};
pub use shared::protocol::{
    CapabilityHooks, Protocol, RequestHandlerExtra, RequestOptions, DEFAULT_REQUEST_TIMEOUT,
};
pub use shared::transport::Transport;
