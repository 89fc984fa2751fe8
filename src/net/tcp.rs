//! Plain TCP transport with a readiness-bounded connect.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, trace};

use super::Transport;
use crate::error::{Error, Result};
use crate::io::Multiplexer;

/// A connected TCP stream in blocking mode.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Resolve `host`, connect without blocking and wait up to `timeout` for
    /// the connect to complete.
    ///
    /// Every resolved address is tried in order; the first that connects
    /// wins. The socket is switched back to blocking mode once connected.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the host does not resolve, the socket cannot
    ///   be created, or the connect reports an error
    /// - [`Error::Timeout`] if the connect does not complete within `timeout`
    ///
    /// With several addresses, the error is the one from the last attempt.
    pub fn connect(host: &str, port: u16, timeout: Duration, mux: &mut Multiplexer) -> Result<Self> {
        let addrs = resolve(host, port)?;
        debug!(host, addrs = addrs.len(), "connecting");
        Self::connect_any(&addrs, timeout, mux)
    }

    fn connect_any(addrs: &[SocketAddr], timeout: Duration, mux: &mut Multiplexer) -> Result<Self> {
        let mut last = None;
        for &addr in addrs {
            match Self::connect_addr(addr, timeout, mux) {
                Ok(tcp) => return Ok(tcp),
                Err(err) => {
                    debug!(%addr, error = %err, "address failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Transport("no addresses to connect to".into())))
    }

    fn connect_addr(addr: SocketAddr, timeout: Duration, mux: &mut Multiplexer) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::Transport(format!("Failed to create socket: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::Transport(format!("Failed to set non-blocking: {e}")))?;

        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(err) if connect_in_progress(&err) => {
                trace!(%addr, "connect in progress");
            }
            Err(err) => {
                return Err(Error::Transport(format!(
                    "Unable to connect to {addr}: {err}"
                )));
            }
        }

        let fd = socket.as_raw_fd();
        mux.wait_writable(fd, Some(timeout)).map_err(|err| match err {
            Error::Timeout(_) => Error::Timeout("connect"),
            Error::Transport(msg) => Error::Transport(format!(
                "An error occurred while connecting to {addr}: {msg}"
            )),
            other => other,
        })?;

        socket
            .set_nonblocking(false)
            .map_err(|e| Error::Transport(format!("Failed to restore blocking mode: {e}")))?;
        debug!(%addr, fd, "connected");

        Ok(Self {
            stream: socket.into(),
        })
    }

    /// Wrap an already connected stream.
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Unwrap the stream.
    #[must_use]
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Transport(format!("Unable to get host address for {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Transport(format!("Unable to get host address for {host}")));
    }
    Ok(addrs)
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == Some(libc::EINPROGRESS)
        || err.raw_os_error() == Some(libc::EALREADY)
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
    }
}
