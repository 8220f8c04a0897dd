//! Line framing for stream transports.
//!
//! Stream transports carry one JSON-RPC envelope per LF-terminated line.
//! [`ReadBuffer`] accumulates raw chunks and yields complete messages as the
//! terminators arrive; partial lines stay buffered untouched.

use bytes::BytesMut;

use crate::error::Result;
use crate::types::JsonRpcMessage;

/// Buffers a continuous byte stream into discrete JSON-RPC messages.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buffer: BytesMut,
}

impl ReadBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of raw bytes.
    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts and decodes the next complete line, if one is buffered.
    ///
    /// Returns `Ok(None)` when no line terminator is present yet. A decode
    /// failure consumes exactly the offending line, so subsequent lines are
    /// unaffected.
    pub fn read_message(&mut self) -> Result<Option<JsonRpcMessage>> {
        let Some(lf_index) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let mut end = lf_index;
        if end > 0 && self.buffer[end - 1] == b'\r' {
            end -= 1;
        }

        let line = self.buffer.split_to(lf_index + 1);
        let message = serde_json::from_slice(&line[..end])?;
        Ok(Some(message))
    }

    /// Discards all buffered bytes. The buffer remains usable.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Serializes a message as one LF-terminated JSON line.
pub fn serialize_message(message: &JsonRpcMessage) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
