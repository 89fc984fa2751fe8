//! Error types for the HTTP and WebSocket protocol layer.
//!
//! Errors never unwind across component boundaries: every fallible operation
//! returns [`Result`], and the session loop reports failures through
//! [`Handler::on_error`](crate::session::Handler::on_error).

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while framing HTTP or WebSocket traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Malformed status/request line, header block or chunk-size line.
    #[error("Parse failure: {0}")]
    Parse(String),

    /// Send/receive failure or unexpected end of stream on a required read.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A readiness wait exceeded its configured bound with no events.
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid WebSocket handshake response.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// Reassembled message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Header block or single line exceeds configured maximum.
    #[error("Header too large: {size} bytes (max: {max})")]
    HeaderTooLarge {
        /// Bytes consumed so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid UTF-8 in a reassembled text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// TLS session establishment or configuration failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The connection has already been shut down.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Whether this error belongs to the transport class.
    ///
    /// Timeouts are folded in here for callers that do not distinguish them.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(_) | Error::ConnectionClosed
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::Timeout("operation timed out")
            }
            _ => Error::Transport(err.to_string()),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
