//! Transports and the shared connection handle.
//!
//! A [`Transport`] is a connected byte stream (plain TCP or TLS over TCP).
//! [`Connection`] shares one between the reading session loop and any thread
//! that sends or closes; [`Inbound`] gates every receive behind a readiness
//! wait bounded by the read timeout.

mod source;
mod tcp;
#[cfg(feature = "tls-rustls")]
mod tls;

pub use source::{Buffered, ByteSource};
pub use tcp::TcpTransport;
#[cfg(feature = "tls-rustls")]
pub use tls::{TlsOptions, TlsTransport, load_certs_from_file};

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::{Interest, Multiplexer};
use crate::url::Url;

/// A connected, blocking byte stream.
pub trait Transport: Send {
    /// Send bytes, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// Returns the OS or TLS error.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receive bytes; `Ok(0)` means the peer closed.
    ///
    /// # Errors
    ///
    /// Returns the OS or TLS error.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut down both directions.
    ///
    /// # Errors
    ///
    /// Returns the OS error.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Plaintext bytes already decrypted and waiting in the session.
    ///
    /// A non-zero value means a receive can proceed without a readiness wait.
    ///
    /// # Errors
    ///
    /// Returns the TLS error if buffered records fail to decrypt.
    fn pending(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    /// Pull in whatever the socket has after a readiness event, without
    /// waiting for more.
    ///
    /// Returns whether a receive would now make progress. Transports that
    /// hand socket bytes straight through always can.
    ///
    /// # Errors
    ///
    /// Returns the OS or TLS error.
    fn fill(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    /// Whether part of an undecodable unit (a TLS record) has been read.
    fn has_partial_input(&self) -> bool {
        false
    }

    /// Descriptor to watch for readiness, if the transport has one.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Whether traffic is encrypted.
    fn is_encrypted(&self) -> bool {
        false
    }
}

/// Open a transport for `url`: TCP connect, then TLS when the scheme asks
/// for it.
///
/// # Errors
///
/// - [`Error::Timeout`] if the connect does not complete in time
/// - [`Error::Transport`] on resolution or connect failure
/// - [`Error::Tls`] if TLS is required but unavailable or fails
pub fn open(url: &Url, config: &Config, mux: &mut Multiplexer) -> Result<Box<dyn Transport>> {
    let tcp = TcpTransport::connect(&url.host, url.port, config.timeouts.connect, mux)?;
    if !url.is_secure() {
        return Ok(Box::new(tcp));
    }

    #[cfg(feature = "tls-rustls")]
    {
        let tls = TlsTransport::connect(
            tcp.into_inner(),
            &url.host,
            &config.tls,
            config.timeouts.connect,
        )?;
        Ok(Box::new(tls))
    }
    #[cfg(not(feature = "tls-rustls"))]
    {
        drop(tcp);
        Err(Error::Tls(format!(
            "{}:// requires the tls-rustls feature",
            url.protocol
        )))
    }
}

/// Cloneable handle to a shared transport.
///
/// Shutdown is idempotent: the first call shuts the transport down, later
/// calls do nothing.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<Box<dyn Transport>>>,
    fd: Option<RawFd>,
    encrypted: bool,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Wrap a transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let fd = transport.raw_fd();
        let encrypted = transport.is_encrypted();
        Self {
            inner: Arc::new(Mutex::new(transport)),
            fd,
            encrypted,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Descriptor of the underlying socket.
    #[must_use]
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// Whether the transport is encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send all of `data`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] after shutdown
    /// - [`Error::Transport`] if the transport fails or stops accepting bytes
    pub fn send_all(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let mut transport = self.inner.lock();
        let mut sent = 0;
        while sent < data.len() {
            match transport.send(&data[sent..]) {
                Ok(0) => {
                    return Err(Error::Transport(format!(
                        "transport accepted {sent} of {} bytes",
                        data.len()
                    )));
                }
                Ok(n) => sent += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(Error::Transport(format!("send failed: {err}"))),
            }
        }
        Ok(())
    }

    /// Receive into `buf`; `Ok(0)` means end of stream.
    ///
    /// Blocks until data arrives. The transport lock is released between
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the receive fails.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(n) = self.try_recv(buf)? {
                return Ok(n);
            }
        }
    }

    /// One receive attempt; `None` when the transport needs more input
    /// before it can hand out bytes.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the receive fails.
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            match self.inner.lock().recv(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // A shutdown racing with the receive reads as end of stream.
                Err(_) if self.is_closed() => return Ok(Some(0)),
                Err(err) => return Err(transport_error(err)),
            }
        }
    }

    /// Pull pending socket input into the transport after a readiness event.
    ///
    /// Returns whether a receive would now make progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the input fails to decrypt, otherwise a
    /// transport-class error.
    pub fn fill(&self) -> Result<bool> {
        loop {
            match self.inner.lock().fill() {
                Ok(ready) => return Ok(ready),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) if self.is_closed() => return Ok(true),
                Err(err) => return Err(transport_error(err)),
            }
        }
    }

    /// Whether the transport holds part of a record it cannot decode yet.
    #[must_use]
    pub fn has_partial_input(&self) -> bool {
        self.inner.lock().has_partial_input()
    }

    /// Decrypted bytes waiting inside the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if buffered records fail to decrypt.
    pub fn pending(&self) -> Result<usize> {
        self.inner
            .lock()
            .pending()
            .map_err(|e| Error::Tls(e.to_string()))
    }

    /// Shut down both directions once.
    ///
    /// Does not take the transport lock, so it unblocks a receive in progress
    /// on another thread.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.fd {
            Some(fd) => {
                // SAFETY: the descriptor stays owned by the transport, which
                // outlives this borrow through `inner`.
                let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
                let socket = socket2::SockRef::from(&borrowed);
                if let Err(err) = socket.shutdown(std::net::Shutdown::Both) {
                    debug!(fd, error = %err, "shutdown failed");
                }
            }
            None => {
                if let Err(err) = self.inner.lock().shutdown() {
                    debug!(error = %err, "shutdown failed");
                }
            }
        }
    }

    /// Send a TLS close notification (if any) and shut down.
    ///
    /// Takes the transport lock; only call from the thread that owns the
    /// receive side.
    pub(crate) fn shutdown_graceful(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.inner.lock().shutdown() {
            debug!(error = %err, "shutdown failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd)
            .field("encrypted", &self.encrypted)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn transport_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::InvalidData => Error::Tls(err.to_string()),
        _ => err.into(),
    }
}

/// Readiness-gated receive side of a [`Connection`].
///
/// Every receive first waits for the descriptor to become readable, bounded
/// by the read timeout, unless the transport already holds decrypted bytes.
#[derive(Debug)]
pub struct Inbound {
    conn: Connection,
    mux: Multiplexer,
    timeout: Option<Duration>,
}

impl Inbound {
    /// Watch `conn` for read and exception readiness on `mux`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the descriptor cannot be watched.
    pub fn new(conn: Connection, mut mux: Multiplexer, timeout: Option<Duration>) -> Result<Self> {
        if let Some(fd) = conn.raw_fd() {
            mux.watch(fd, Interest::READ | Interest::EXCEPTION)?;
        }
        Ok(Self { conn, mux, timeout })
    }

    /// The connection being read.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// First non-zero socket error seen by the most recent wait.
    #[must_use]
    pub fn last_os_error(&self) -> Option<i32> {
        self.mux.last_os_error()
    }

    /// Whether the last receive stopped inside a record the transport
    /// cannot decode yet.
    #[must_use]
    pub fn has_partial_input(&self) -> bool {
        self.conn.has_partial_input()
    }

    /// Block until a receive would make progress.
    ///
    /// Input that decodes to nothing (TLS handshake traffic) does not end the
    /// wait; the read timeout applies afresh to each readiness wait.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing arrives within the read timeout
    /// - [`Error::Transport`] if the descriptor reports an error
    pub fn wait_readable(&mut self) -> Result<()> {
        loop {
            if self.conn.pending()? > 0 {
                return Ok(());
            }
            let Some(fd) = self.conn.raw_fd() else {
                return Ok(());
            };
            self.mux.wait_readable(fd, self.timeout)?;
            if !self.conn.is_encrypted() || self.conn.fill()? {
                return Ok(());
            }
        }
    }
}

impl ByteSource for Inbound {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            self.wait_readable()?;
            if let Some(n) = self.conn.try_recv(buf)? {
                return Ok(n);
            }
        }
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        if let Some(fd) = self.conn.raw_fd() {
            if let Err(err) = self.mux.unwatch(fd, Interest::READ | Interest::EXCEPTION) {
                debug!(fd, error = %err, "unwatch on drop failed");
            }
        }
    }
}
