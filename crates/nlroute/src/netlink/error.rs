//! Error types for rtnetlink operations.

use std::io;

/// Result type for rtnetlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, decoding or transporting messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Netlink message type this codec does not understand.
    #[error("unrecognized message type {0}")]
    UnknownType(u16),

    /// The message kind cannot be written to the wire.
    #[error("message is not encodable: {0}")]
    NotEncodable(String),

    /// The handler has no open socket.
    #[error("rtnetlink handler is not started")]
    NotStarted,

    /// Interface not found.
    #[error("interface not found: {name}")]
    InterfaceNotFound {
        /// The interface name that was not found.
        name: String,
    },
}

impl Error {
    /// Check if this error came out of the wire codec rather than the
    /// transport.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::InvalidMessage(_)
                | Self::InvalidAttribute(_)
                | Self::UnknownType(_)
        )
    }
}
