//! Framing errors.

use thiserror::Error;

/// Result type for codec operations.
pub type WireResult<T> = Result<T, ProtocolError>;

/// Malformed bytes at the framing layer.
///
/// Every variant is fatal to the connection: once the byte stream has lost
/// framing there is no way to find the next message boundary, so the
/// caller closes the socket without replying.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The first four header bytes were not the sync token.
    #[error("invalid sync bytes {0:02x?}")]
    BadSync([u8; 4]),

    /// The opcode byte is outside the message-id alphabet.
    #[error("unknown message id 0x{0:02x}")]
    UnknownMessageId(u8),

    /// The length field contained something other than digits and spaces.
    #[error("invalid length field {0:?}")]
    BadLength(String),

    /// The declared body length exceeds the protocol maximum.
    #[error("body length {length} exceeds maximum {max}")]
    BodyTooLarge { length: usize, max: usize },

    /// The stream ended part way through a header or body.
    #[error("truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The peer closed the connection cleanly between messages.
    #[error("connection closed")]
    ConnectionClosed,

    /// Underlying I/O failure (including read timeouts).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if this error is a socket read timeout rather than
    /// malformed data.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }
}
