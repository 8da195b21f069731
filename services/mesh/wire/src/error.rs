//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, PartialEq)]
pub enum WireError {
    /// Incomplete frame (need more data)
    #[error("incomplete frame")]
    Incomplete,

    /// Frame does not open and close with the sentinel byte
    #[error("frame delimiter missing")]
    Delimiter,

    /// Escape byte followed by something other than an escaped sentinel or escape
    #[error("invalid escape sequence 0x7d 0x{0:02x}")]
    InvalidEscape(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown packet type
    #[error("unknown type {0}")]
    Type(u8),

    /// Unknown request code
    #[error("unknown code {0}")]
    Code(u8),

    /// Required JSON field missing or of the wrong shape
    #[error("missing or invalid field `{0}`")]
    Field(&'static str),

    /// JSON message could not be mapped to a radio packet
    #[error("json message not representable: {0}")]
    Json(String),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
