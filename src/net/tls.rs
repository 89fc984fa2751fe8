//! TLS transport over a connected TCP stream (rustls).

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use tracing::debug;

use super::Transport;
use crate::error::{Error, Result};

/// Trust configuration for client sessions.
///
/// The webpki root set is always trusted; `extra_roots` adds private CAs.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Additional trust anchors.
    pub extra_roots: Vec<CertificateDer<'static>>,
}

impl TlsOptions {
    /// Create options trusting only the webpki roots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust an additional certificate.
    #[must_use]
    pub fn with_root(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Trust every certificate in a PEM file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the file cannot be read or holds no
    /// certificates.
    pub fn with_root_pem_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.extra_roots.extend(load_certs_from_file(path.as_ref())?);
        Ok(self)
    }

    fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        for cert in &self.extra_roots {
            roots
                .add(cert.clone())
                .map_err(|e| Error::Tls(format!("invalid trust anchor: {e}")))?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the file cannot be read or holds no
/// certificates.
pub fn load_certs_from_file(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("cannot parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Tracks TLS record boundaries in the ciphertext handed to the session.
#[derive(Debug, Default)]
struct RecordCursor {
    header: [u8; 5],
    header_len: usize,
    body_left: usize,
}

impl RecordCursor {
    fn advance(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.body_left > 0 {
                let n = self.body_left.min(data.len());
                self.body_left -= n;
                data = &data[n..];
                continue;
            }
            let take = (self.header.len() - self.header_len).min(data.len());
            self.header[self.header_len..self.header_len + take].copy_from_slice(&data[..take]);
            self.header_len += take;
            data = &data[take..];
            if self.header_len == self.header.len() {
                self.body_left = usize::from(u16::from_be_bytes([self.header[3], self.header[4]]));
                self.header_len = 0;
            }
        }
    }

    fn is_partial(&self) -> bool {
        self.header_len > 0 || self.body_left > 0
    }
}

/// Socket reader that records how far into a TLS record the stream is.
struct Tap<'a> {
    sock: &'a mut TcpStream,
    records: &'a mut RecordCursor,
}

impl Read for Tap<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.sock.read(buf)?;
        self.records.advance(&buf[..n]);
        Ok(n)
    }
}

/// A client TLS session over a blocking TCP stream.
///
/// Receives never wait for more ciphertext on their own: each call performs
/// at most one socket read, so the caller's readiness wait bounds every
/// blocking step.
pub struct TlsTransport {
    conn: ClientConnection,
    sock: TcpStream,
    records: RecordCursor,
}

impl TlsTransport {
    /// Run the TLS handshake over `tcp`, verifying the certificate for
    /// `host`. Each socket operation of the handshake is bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Tls`] if `host` is not a valid server name or the
    ///   handshake fails
    /// - [`Error::Timeout`] if the server stops answering mid-handshake
    pub fn connect(
        mut tcp: TcpStream,
        host: &str,
        options: &TlsOptions,
        timeout: Duration,
    ) -> Result<Self> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::Tls(format!("invalid DNS name: {host}")))?;
        let mut conn = ClientConnection::new(options.client_config()?, name)
            .map_err(|e| Error::Tls(e.to_string()))?;

        // A zero duration is rejected by the socket layer.
        let limit = (!timeout.is_zero()).then_some(timeout);
        set_timeouts(&tcp, limit)?;
        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(|err| match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout("connect"),
                _ => Error::Tls(format!("handshake failed: {err}")),
            })?;
        }
        set_timeouts(&tcp, None)?;

        debug!(
            host,
            version = ?conn.protocol_version(),
            "TLS session established"
        );
        Ok(Self {
            conn,
            sock: tcp,
            records: RecordCursor::default(),
        })
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.conn.reader().read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // Peer closed without close_notify.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(Some(0)),
            Err(err) => Err(err),
        }
    }
}

fn set_timeouts(tcp: &TcpStream, limit: Option<Duration>) -> Result<()> {
    tcp.set_read_timeout(limit)
        .and_then(|()| tcp.set_write_timeout(limit))
        .map_err(|e| Error::Transport(format!("Failed to set socket timeout: {e}")))
}

impl Transport for TlsTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.sock)?;
        }
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(n) = self.read_plaintext(buf)? {
            return Ok(n);
        }
        self.fill()?;
        self.read_plaintext(buf)?
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }

    fn fill(&mut self) -> io::Result<bool> {
        let mut tap = Tap {
            sock: &mut self.sock,
            records: &mut self.records,
        };
        let eof = self.conn.read_tls(&mut tap)? == 0;
        let state = self
            .conn
            .process_new_packets()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(eof || state.peer_has_closed() || state.plaintext_bytes_to_read() > 0)
    }

    fn has_partial_input(&self) -> bool {
        self.records.is_partial()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.conn.send_close_notify();
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut self.sock)? == 0 {
                break;
            }
        }
        match self.sock.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn pending(&mut self) -> io::Result<usize> {
        self.conn
            .process_new_packets()
            .map(|state| state.plaintext_bytes_to_read())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.sock.as_raw_fd())
    }

    fn is_encrypted(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_certs_file_not_found() {
        let result = load_certs_from_file(Path::new("/nonexistent/path/cert.pem"));
        assert!(matches!(result, Err(Error::Tls(_))));
    }

    #[test]
    fn test_load_certs_no_certs_in_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"not a certificate\njust some text\n").unwrap();
        temp.flush().unwrap();

        let result = load_certs_from_file(temp.path());
        assert!(matches!(result, Err(Error::Tls(msg)) if msg.contains("no certificates")));
    }

    #[test]
    fn test_options_default_config() {
        let options = TlsOptions::new();
        assert!(options.extra_roots.is_empty());
        assert!(options.client_config().is_ok());
    }

    #[test]
    fn test_record_cursor_tracks_boundaries() {
        let mut records = RecordCursor::default();
        assert!(!records.is_partial());

        // Header split across reads, then a 3-byte body.
        records.advance(&[0x17, 0x03]);
        assert!(records.is_partial());
        records.advance(&[0x03, 0x00, 0x03, 0xaa]);
        assert!(records.is_partial());
        records.advance(&[0xbb, 0xcc]);
        assert!(!records.is_partial());

        // Two whole records in one read, then half of a third.
        records.advance(&[0x17, 0x03, 0x03, 0x00, 0x01, 0x01, 0x17, 0x03, 0x03, 0x00, 0x00]);
        assert!(!records.is_partial());
        records.advance(&[0x17, 0x03, 0x03, 0x00, 0x04, 0x01]);
        assert!(records.is_partial());
    }

    #[test]
    fn test_invalid_server_name() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let result = TlsTransport::connect(
            tcp,
            "not a host name",
            &TlsOptions::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::Tls(msg)) if msg.contains("invalid DNS name")));
    }
}
