//! Blocking WebSocket client session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::handler::Handler;
use super::state::SessionState;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::HttpReader;
use crate::io::Multiplexer;
use crate::message::{CloseCode, CloseFrame};
use crate::net::{self, Buffered, Connection, Inbound};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::{ClientHandshake, FrameHeader, MessageAssembler, OpCode, encode_frame, random_mask};
use crate::url::Url;

type FrameSource = Buffered<Inbound>;

#[derive(Debug, Default)]
struct Shared {
    quit: AtomicBool,
    state: Mutex<SessionState>,
    connection: Mutex<Option<Connection>>,
    last_error: Mutex<Option<String>>,
}

/// Handle to a running (or finished) session.
///
/// Cheap to clone and usable from any thread: one clone is passed to every
/// [`Handler`] callback, others can be obtained from
/// [`WebSocketClient::session`] to send frames or close the session while
/// [`run`](WebSocketClient::run) blocks elsewhere.
#[derive(Debug, Clone, Default)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Message of the most recent failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    /// Whether [`close`](Self::close) has been requested or the run finished.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.quit.load(Ordering::Acquire)
    }

    /// Send one frame, masked with a fresh random key.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] unless the session is open
    /// - [`Error::ProtocolViolation`] for a fragmented or oversized control frame
    /// - [`Error::Transport`] if the send fails
    pub fn send(&self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if opcode.is_control() && (!fin || payload.len() as u64 > MAX_CONTROL_FRAME_PAYLOAD) {
            return Err(Error::ProtocolViolation(format!(
                "{opcode} frame must be final and at most {MAX_CONTROL_FRAME_PAYLOAD} bytes"
            )));
        }
        if !self.state().can_send() {
            return Err(Error::ConnectionClosed);
        }
        let conn = self.connection().ok_or(Error::ConnectionClosed)?;

        let frame = encode_frame(fin, opcode, Some(random_mask()?), payload);
        trace!(%opcode, fin, len = payload.len(), "sending frame");
        conn.send_all(&frame).inspect_err(|err| self.record_error(err))
    }

    /// Send a complete text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(true, OpCode::Text, text.as_bytes())
    }

    /// Send a complete binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send(true, OpCode::Binary, data)
    }

    /// Send a PING.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_ping(&self, data: &[u8]) -> Result<()> {
        self.send(true, OpCode::Ping, data)
    }

    /// Send a PONG.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_pong(&self, data: &[u8]) -> Result<()> {
        self.send(true, OpCode::Pong, data)
    }

    /// Send a CLOSE frame and move to [`SessionState::Closing`].
    ///
    /// The run loop keeps reading until the peer answers with its own CLOSE
    /// or drops the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] for a reserved code or a reason over 123 bytes
    /// - see [`send`](Self::send)
    pub fn send_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        let payload = CloseFrame::new(code, reason).to_payload()?;
        self.send(true, OpCode::Close, &payload)?;
        self.set_state(SessionState::Closing);
        Ok(())
    }

    /// Stop the session and shut the transport down.
    ///
    /// Wakes a `run` blocked in a readiness wait or receive. Only the first
    /// call has any effect.
    pub fn close(&self) {
        if self.shared.quit.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if state.is_active() {
                *state = SessionState::Closing;
            }
        }
        if let Some(conn) = self.connection() {
            debug!(fd = ?conn.raw_fd(), "close requested");
            conn.shutdown();
        }
    }

    fn connection(&self) -> Option<Connection> {
        self.shared.connection.lock().clone()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.shared.state.lock();
        if *state != next {
            trace!(from = %*state, to = %next, "session state");
            *state = next;
        }
    }

    fn record_error(&self, err: &Error) {
        *self.shared.last_error.lock() = Some(err.to_string());
    }

    fn begin(&self) {
        self.shared.quit.store(false, Ordering::Release);
        *self.shared.last_error.lock() = None;
        self.set_state(SessionState::Connecting);
    }

    fn attach(&self, conn: Connection) {
        *self.shared.connection.lock() = Some(conn);
    }

    fn teardown(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.set_state(SessionState::Closed);
        if let Some(conn) = self.shared.connection.lock().take() {
            conn.shutdown_graceful();
        }
    }

    /// Errors after a requested close are the expected fallout of the
    /// shutdown, not failures.
    fn unless_closing(&self, err: Error) -> Result<()> {
        if self.is_closing() {
            trace!(error = %err, "read ended after close");
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// Blocking WebSocket client.
///
/// [`run`](Self::run) drives one session from connect to close on the calling
/// thread, reporting events to a [`Handler`]. The client may be run again
/// after a session ends; no reconnect happens on its own.
///
/// # Example
///
/// ```no_run
/// use rswire::session::{Handlers, WebSocketClient};
///
/// let mut client = WebSocketClient::new();
/// let mut handlers = Handlers::new()
///     .on_open(|session| {
///         let _ = session.send_text("hello");
///     })
///     .on_message(|session, payload, _| {
///         println!("{}", String::from_utf8_lossy(payload));
///         session.close();
///     });
/// client.run("ws://127.0.0.1:9001/", &mut handlers)?;
/// # Ok::<(), rswire::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct WebSocketClient {
    config: Config,
    session: Session,
}

impl WebSocketClient {
    /// Client with the hardened default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Client with a custom configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            session: Session::new(),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable configuration; changes apply to the next `run`.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Set the announced `Sec-WebSocket-Version`.
    pub fn set_version(&mut self, version: u8) {
        self.config.version = version;
    }

    /// Set the requested subprotocol.
    pub fn set_protocol(&mut self, protocol: impl Into<String>) {
        self.config.protocol = Some(protocol.into());
    }

    /// Set the connect timeout.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.config.timeouts.connect = timeout;
    }

    /// Set the read timeout. `None` waits indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.config.timeouts.read = timeout;
    }

    /// A handle to this client's session, valid across runs.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Message of the most recent failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.session.last_error()
    }

    /// See [`Session::close`].
    pub fn close(&self) {
        self.session.close();
    }

    /// See [`Session::send`].
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub fn send(&self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.session.send(fin, opcode, payload)
    }

    /// See [`Session::send_text`].
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.session.send_text(text)
    }

    /// See [`Session::send_binary`].
    ///
    /// # Errors
    ///
    /// See [`Session::send`].
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.session.send_binary(data)
    }

    /// See [`Session::send_close`].
    ///
    /// # Errors
    ///
    /// See [`Session::send_close`].
    pub fn send_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.session.send_close(code, reason)
    }

    /// Connect to `url`, perform the upgrade, and read frames until the peer
    /// closes, the transport fails, or [`close`](Self::close) is called.
    ///
    /// `on_open` runs once the handshake succeeds. Every failure is reported
    /// to `on_error` and returned; a failure caused by a requested close is
    /// not. `on_close` runs last, but only if the session had been opened.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if `url` does not parse
    /// - [`Error::Timeout`] if the connect or a frame read times out
    /// - [`Error::Transport`] / [`Error::Tls`] on connection failure
    /// - [`Error::InvalidHandshake`] if the upgrade is refused
    /// - a protocol or limit error for a malformed frame stream
    pub fn run<H: Handler + ?Sized>(&mut self, url: &str, handler: &mut H) -> Result<()> {
        let session = self.session.clone();
        session.begin();

        let mut opened = false;
        let result = match self.open(url, &session) {
            Ok(source) => {
                opened = true;
                session.set_state(SessionState::Open);
                info!(%url, "websocket session open");
                handler.on_open(&session);
                self.read_frames(source, &session, handler)
            }
            Err(err) => session.unless_closing(err),
        };

        if let Err(err) = &result {
            warn!(%url, error = %err, "websocket session failed");
            session.record_error(err);
            handler.on_error(&session, err);
        }

        session.teardown();
        debug!(%url, "websocket session closed");
        if opened {
            handler.on_close(&session);
        }
        result
    }

    fn open(&self, url: &str, session: &Session) -> Result<FrameSource> {
        let url = Url::parse(url)?;
        let mut mux = Multiplexer::new(self.config.backend, 1)?;
        let conn = Connection::new(net::open(&url, &self.config, &mut mux)?);
        session.attach(conn.clone());
        if session.is_closing() {
            return Err(Error::ConnectionClosed);
        }

        session.set_state(SessionState::Handshaking);
        let handshake = ClientHandshake::new(&url, &self.config)?;
        conn.send_all(handshake.request())?;
        debug!(host = %url.host, "upgrade request sent");

        let inbound = Inbound::new(conn, mux, self.config.timeouts.read)?;
        let mut reader = HttpReader::new(
            Buffered::new(inbound, self.config.read_buffer_size),
            self.config.limits.clone(),
        );
        reader.read_head()?;
        handshake.validate(reader.message(), reader.headers(), self.config.verify_accept)?;
        Ok(reader.into_inner())
    }

    fn read_frames<H: Handler + ?Sized>(
        &self,
        mut source: FrameSource,
        session: &Session,
        handler: &mut H,
    ) -> Result<()> {
        let limits = &self.config.limits;
        let mut assembler = self
            .config
            .reassemble_fragments
            .then(|| MessageAssembler::new(limits.clone()));

        while !session.is_closing() {
            if source.buffered() == 0 {
                match source.get_mut().wait_readable() {
                    Ok(()) => {}
                    // Idle between frames is not a failure; a record cut
                    // off mid-way is.
                    Err(Error::Timeout(_)) if !source.get_ref().has_partial_input() => continue,
                    Err(err) => return session.unless_closing(err),
                }
            }

            let (header, payload) = match read_frame(&mut source, limits) {
                Ok(frame) => frame,
                Err(err) => return session.unless_closing(err),
            };
            trace!(opcode = %header.opcode, fin = header.fin, len = header.payload_len, "frame received");

            if header.opcode.is_control() {
                header.check_control()?;
            }

            match header.opcode {
                OpCode::Close => {
                    match CloseFrame::parse(&payload) {
                        Ok(Some(frame)) => {
                            debug!(code = frame.code.as_u16(), reason = %frame.reason, "close frame received");
                        }
                        Ok(None) => debug!("close frame received"),
                        Err(err) => warn!(error = %err, "malformed close payload"),
                    }
                    session.set_state(SessionState::Closing);
                    break;
                }
                OpCode::Ping if self.config.auto_pong && session.state().can_send() => {
                    if let Err(err) = session.send_pong(&payload) {
                        return session.unless_closing(err);
                    }
                }
                _ => {}
            }

            match assembler.as_mut() {
                Some(assembler) => {
                    if let Some(message) = assembler.push(&header, payload)? {
                        handler.on_message(session, &message.payload, &message.header);
                    }
                }
                None => handler.on_message(session, &payload, &header),
            }
        }
        Ok(())
    }
}

fn read_frame(source: &mut FrameSource, limits: &crate::config::Limits) -> Result<(FrameHeader, Vec<u8>)> {
    let mut header = FrameHeader::read_from(source)?;
    let payload = header.read_payload(source, limits)?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = WebSocketClient::new();
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(client.last_error(), None);
    }

    #[test]
    fn test_send_requires_open_session() {
        let client = WebSocketClient::new();
        assert_eq!(client.send_text("hi"), Err(Error::ConnectionClosed));
        assert_eq!(
            client.send_close(CloseCode::Normal, "bye"),
            Err(Error::ConnectionClosed)
        );
    }

    #[test]
    fn test_control_frame_rules() {
        let session = Session::new();
        assert!(matches!(
            session.send(false, OpCode::Ping, b""),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            session.send_ping(&[0u8; 126]),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            session.send_close(CloseCode::Other(1005), ""),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_close_twice_before_run() {
        let client = WebSocketClient::new();
        client.close();
        client.close();
        assert!(client.session().is_closing());
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_invalid_url_reports_error() {
        let mut client = WebSocketClient::new();
        let mut errors = Vec::new();
        let mut closed = false;
        let result = {
            let mut handlers = crate::session::Handlers::new()
                .on_error(|_, err| errors.push(err.clone()))
                .on_close(|_| closed = true);
            client.run("not a url", &mut handlers)
        };
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
        assert_eq!(errors.len(), 1);
        assert!(!closed);
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.last_error().is_some());
    }

    #[test]
    fn test_setters_update_config() {
        let mut client = WebSocketClient::new();
        client.set_version(8);
        client.set_protocol("chat");
        client.set_connect_timeout(Duration::from_secs(1));
        client.set_read_timeout(None);
        assert_eq!(client.config().version, 8);
        assert_eq!(client.config().protocol.as_deref(), Some("chat"));
        assert_eq!(client.config().timeouts.connect, Duration::from_secs(1));
        assert_eq!(client.config().timeouts.read, None);
    }
}
