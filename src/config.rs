//! Configuration, limits and timeouts for HTTP and WebSocket sessions.

use std::time::Duration;

/// Resource limits applied while reading from the wire.
///
/// These bound memory usage when a peer declares absurd lengths or never
/// terminates a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum resolved payload length of a single frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: u64,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Only consulted when fragment reassembly is enabled.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of an HTTP header block in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_header_size: usize,

    /// Maximum length of a single CRLF-terminated line.
    ///
    /// Default: 8 KB (8192)
    pub max_line_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_header_size: 8192,
            max_line_length: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: u64,
        max_message_size: usize,
        max_header_size: usize,
        max_line_length: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_header_size,
            max_line_length,
        }
    }

    /// Create limits suitable for small embedded systems.
    ///
    /// - Max frame: 64 KB
    /// - Max message: 256 KB
    /// - Max header block: 4 KB
    /// - Max line: 1 KB
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
            max_header_size: 4096,
            max_line_length: 1024,
        }
    }

    /// Validate that a frame's declared length is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<(), crate::Error> {
        if size > self.max_frame_size {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a reassembled message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a header block is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeaderTooLarge`](crate::Error::HeaderTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_header_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_header_size {
            Err(crate::Error::HeaderTooLarge {
                size,
                max: self.max_header_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Per-session timeouts.
///
/// `connect` bounds the write-readiness wait after a non-blocking connect;
/// `read` bounds every readiness wait that precedes a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Connect timeout.
    ///
    /// Default: 15 seconds
    pub connect: Duration,

    /// Read timeout. `None` waits indefinitely.
    ///
    /// Default: 15 seconds
    pub read: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            read: Some(Duration::from_secs(15)),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(connect: Duration, read: Option<Duration>) -> Self {
        Self { connect, read }
    }
}

/// Which readiness backend a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollerBackend {
    /// Bitmap scan over every watched descriptor (`poll(2)`).
    Scan,
    /// Event-queue registration (epoll/kqueue).
    #[default]
    Queue,
}

/// Session configuration shared by the HTTP and WebSocket clients.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Timeout configuration.
    pub timeouts: Timeouts,

    /// Readiness backend.
    ///
    /// Default: [`PollerBackend::Queue`]
    pub backend: PollerBackend,

    /// Value sent in `Sec-WebSocket-Version`.
    ///
    /// Default: 13
    pub version: u8,

    /// Optional `Sec-WebSocket-Protocol` value.
    pub protocol: Option<String>,

    /// Extra headers sent with the upgrade request.
    pub headers: Vec<(String, String)>,

    /// Verify `Sec-WebSocket-Accept` against the key we sent.
    ///
    /// Default: true
    pub verify_accept: bool,

    /// Reassemble continuation frames into whole messages before delivery.
    ///
    /// Default: true
    pub reassemble_fragments: bool,

    /// Answer every PING with a PONG carrying the same payload.
    ///
    /// Default: true
    pub auto_pong: bool,

    /// Receive buffer size used when draining HTTP bodies.
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// TLS options for `wss://` and `https://` URLs.
    #[cfg(feature = "tls-rustls")]
    pub tls: crate::net::TlsOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            backend: PollerBackend::default(),
            version: 13,
            protocol: None,
            headers: Vec::new(),
            verify_accept: true,
            reassemble_fragments: true,
            auto_pong: true,
            read_buffer_size: 8192,
            #[cfg(feature = "tls-rustls")]
            tls: crate::net::TlsOptions::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with hardened defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration matching the reference client's observable behaviour.
    ///
    /// The accept key is only checked for presence, every frame is delivered
    /// on its own, and PINGs are handed to the message handler unanswered.
    #[must_use]
    pub fn compat() -> Self {
        Self {
            verify_accept: false,
            reassemble_fragments: false,
            auto_pong: false,
            ..Default::default()
        }
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// Set the read timeout. `None` waits indefinitely.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeouts.read = timeout;
        self
    }

    /// Select the readiness backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: PollerBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the WebSocket version announced in the handshake.
    #[must_use]
    pub const fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Set the requested subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Add an extra header to the upgrade request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set TLS options.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls(mut self, tls: crate::net::TlsOptions) -> Self {
        self.tls = tls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 64 * 1024 * 1024);
        assert_eq!(limits.max_header_size, 8192);
        assert_eq!(limits.max_line_length, 8192);
    }

    #[test]
    fn test_limits_embedded() {
        let limits = Limits::embedded();
        assert_eq!(limits.max_frame_size, 64 * 1024);
        assert_eq!(limits.max_message_size, 256 * 1024);
        assert_eq!(limits.max_header_size, 4096);
        assert_eq!(limits.max_line_length, 1024);
    }

    #[test]
    fn test_limits_check_frame_size() {
        let limits = Limits::default();
        assert!(limits.check_frame_size(1024).is_ok());
        assert!(limits.check_frame_size(20 * 1024 * 1024).is_err());
    }

    #[test]
    fn test_limits_check_message_size() {
        let limits = Limits::default();
        assert!(limits.check_message_size(1024).is_ok());
        assert!(limits.check_message_size(100 * 1024 * 1024).is_err());
    }

    #[test]
    fn test_limits_check_header_size() {
        let limits = Limits::default();
        assert!(limits.check_header_size(1024).is_ok());
        assert!(matches!(
            limits.check_header_size(10_000),
            Err(crate::Error::HeaderTooLarge { size: 10_000, max: 8192 })
        ));
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(15));
        assert_eq!(timeouts.read, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_config_default_is_hardened() {
        let config = Config::default();
        assert_eq!(config.version, 13);
        assert!(config.verify_accept);
        assert!(config.reassemble_fragments);
        assert!(config.auto_pong);
        assert_eq!(config.backend, PollerBackend::Queue);
    }

    #[test]
    fn test_config_compat() {
        let config = Config::compat();
        assert!(!config.verify_accept);
        assert!(!config.reassemble_fragments);
        assert!(!config.auto_pong);
        assert_eq!(config.timeouts, Timeouts::default());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_limits(Limits::embedded())
            .with_connect_timeout(Duration::from_secs(3))
            .with_read_timeout(None)
            .with_backend(PollerBackend::Scan)
            .with_protocol("chat")
            .with_header("Origin", "http://localhost");

        assert_eq!(config.limits.max_frame_size, 64 * 1024);
        assert_eq!(config.timeouts.connect, Duration::from_secs(3));
        assert_eq!(config.timeouts.read, None);
        assert_eq!(config.backend, PollerBackend::Scan);
        assert_eq!(config.protocol.as_deref(), Some("chat"));
        assert_eq!(config.headers.len(), 1);
    }
}
