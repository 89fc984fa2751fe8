//! Session lifecycle.

/// Lifecycle state of a [`WebSocketClient`](super::WebSocketClient).
///
/// ```text
/// Disconnected -> Connecting -> Handshaking -> Open -> Closing -> Closed
/// ```
///
/// Any failure before `Open` goes straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// `run` has not been called.
    #[default]
    Disconnected,
    /// Resolving and connecting the transport.
    Connecting,
    /// Upgrade request sent, waiting for the response head.
    Handshaking,
    /// Frames flow in both directions.
    Open,
    /// Close requested or CLOSE received; the read loop is winding down.
    Closing,
    /// Transport released.
    Closed,
}

impl SessionState {
    /// Whether the session still holds a transport.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, SessionState::Disconnected | SessionState::Closed)
    }

    /// Whether frames may be sent.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Handshaking => "Handshaking",
            SessionState::Open => "Open",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        })
    }
}
