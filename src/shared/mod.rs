//! Pieces shared by the client and server roles: the transport contract,
//! the framing helpers, the concrete transports usable from either side,
//! and the protocol engine itself.

pub mod memory;
pub mod protocol;
pub mod read_buffer;
pub mod stdio;
pub mod transport;
#[cfg(feature = "transport-ws")]
pub mod websocket;

pub use memory::InMemoryTransport;
pub use protocol::{
    CapabilityHooks, Protocol, RequestHandlerExtra, RequestOptions, DEFAULT_REQUEST_TIMEOUT,
};
pub use read_buffer::ReadBuffer;
pub use stdio::{StdioClientTransport, StdioServerTransport, StdioTransport};
pub use transport::Transport;
#[cfg(feature = "transport-ws")]
pub use websocket::WebSocketTransport;
