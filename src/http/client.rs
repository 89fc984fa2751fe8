//! Minimal blocking HTTP/1.1 client.
//!
//! # Example
//!
//! ```no_run
//! use rswire::http::HttpClient;
//!
//! let mut client = HttpClient::new("http://example.com/")?;
//! client.add_header("Accept", "text/html");
//! client.connect()?;
//! client.response()?;
//! println!("{:?}", client.status());
//! let body = client.read_body()?;
//! # Ok::<(), rswire::Error>(())
//! ```

use tracing::{debug, info};

use super::header::HeaderTable;
use super::reader::{HttpMessage, HttpReader};
use super::request::write_request_head;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::Multiplexer;
use crate::net::{self, Buffered, Connection, Inbound};
use crate::url::Url;

/// Response reader bound to a live connection.
pub type ResponseReader = HttpReader<Buffered<Inbound>>;

/// One request/response exchange over a fresh connection.
#[derive(Debug)]
pub struct HttpClient {
    url: Url,
    config: Config,
    method: String,
    headers: HeaderTable,
    conn: Option<Connection>,
    reader: Option<ResponseReader>,
}

impl HttpClient {
    /// Create a client for `url` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` does not parse.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, Config::default())
    }

    /// Create a client for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` does not parse.
    pub fn with_config(url: &str, config: Config) -> Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            config,
            method: "GET".to_string(),
            headers: HeaderTable::new(),
            conn: None,
            reader: None,
        })
    }

    /// Point the client at another URL. Closes any open connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` does not parse.
    pub fn set_url(&mut self, url: &str) -> Result<()> {
        let url = Url::parse(url)?;
        self.close();
        self.url = url;
        Ok(())
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Set the request method (default `GET`).
    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    /// Add a request header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderTable {
        &mut self.headers
    }

    /// Connect and send the request head.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the connect does not complete in time
    /// - [`Error::Transport`] on resolution, connect or send failure
    /// - [`Error::Tls`] if TLS is required and fails
    /// - [`Error::Parse`] if a request header cannot be serialized
    pub fn connect(&mut self) -> Result<()> {
        self.close();

        let mut head = Vec::with_capacity(256);
        write_request_head(&mut head, &self.method, &self.url, &self.headers)?;

        let mut mux = Multiplexer::new(self.config.backend, 1)?;
        let conn = Connection::new(net::open(&self.url, &self.config, &mut mux)?);
        info!(url = %self.url, method = %self.method, "HTTP connection established");

        conn.send_all(&head)?;
        let inbound = Inbound::new(conn.clone(), mux, self.config.timeouts.read)?;
        self.reader = Some(HttpReader::new(
            Buffered::new(inbound, self.config.read_buffer_size),
            self.config.limits.clone(),
        ));
        self.conn = Some(conn);
        Ok(())
    }

    /// Send request body bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if not connected
    /// - [`Error::Transport`] if the send fails
    pub fn send(&mut self, body: &[u8]) -> Result<()> {
        self.conn
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send_all(body)
    }

    /// Read the response status line and headers.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if not connected
    /// - [`Error::Parse`] on a malformed response head
    /// - a transport-class error if the stream fails or times out
    pub fn response(&mut self) -> Result<&HttpMessage> {
        let reader = self.reader.as_mut().ok_or(Error::ConnectionClosed)?;
        let message = reader.read_head()?;
        debug!(status = ?message.status_code(), "response head received");
        Ok(message)
    }

    /// Response status code.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.reader.as_ref()?.message().status_code()
    }

    /// Response reason phrase.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reader.as_ref()?.message().reason()
    }

    /// Response headers.
    #[must_use]
    pub fn response_headers(&self) -> Option<&HeaderTable> {
        self.reader.as_ref().map(HttpReader::headers)
    }

    /// First value of a response header.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.response_headers()?.get(name)
    }

    /// Every value of a response header.
    #[must_use]
    pub fn fields(&self, name: &str) -> &[String] {
        self.response_headers()
            .map_or(&[][..], |headers| headers.get_all(name))
    }

    /// Body reader for incremental reads.
    pub fn body(&mut self) -> Option<&mut ResponseReader> {
        self.reader.as_mut()
    }

    /// Read body bytes; `Ok(0)` once the body is complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on malformed chunk framing.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }

    /// Read the rest of the body.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] on malformed chunk framing
    /// - [`Error::MessageTooLarge`] if the body exceeds the message limit
    pub fn read_body(&mut self) -> Result<Vec<u8>> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_to_end(),
            None => Ok(Vec::new()),
        }
    }

    /// Read the rest of the body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUtf8`] if the body is not UTF-8
    /// - see [`read_body`](Self::read_body)
    pub fn read_text(&mut self) -> Result<String> {
        String::from_utf8(self.read_body()?).map_err(|_| Error::InvalidUtf8)
    }

    /// Socket error code reported by the most recent readiness wait.
    #[must_use]
    pub fn last_os_error(&self) -> Option<i32> {
        self.reader.as_ref()?.get_ref().get_ref().last_os_error()
    }

    /// Shut down and release the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.reader = None;
        if let Some(conn) = self.conn.take() {
            conn.shutdown_graceful();
            debug!(url = %self.url, "HTTP connection closed");
        }
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(matches!(
            HttpClient::new("not a url"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_unconnected_accessors() {
        let mut client = HttpClient::new("http://h/").unwrap();
        assert_eq!(client.status(), None);
        assert_eq!(client.field("Server"), None);
        assert!(client.fields("Server").is_empty());
        assert_eq!(client.send(b"x"), Err(Error::ConnectionClosed));
        assert_eq!(client.read_body().unwrap(), Vec::<u8>::new());
        client.close();
        client.close();
    }

    #[test]
    fn test_set_url() {
        let mut client = HttpClient::new("http://a/").unwrap();
        client.set_url("https://b:8443/x").unwrap();
        assert_eq!(client.url().host, "b");
        assert_eq!(client.url().port, 8443);
        assert!(client.set_url("bad").is_err());
        assert_eq!(client.url().host, "b");
    }
}
