//! Client side of the opening handshake.
//!
//! Builds the HTTP Upgrade request and validates the server's response.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::{HeaderTable, HttpMessage, write_request_head};
use crate::url::Url;

/// GUID appended to the key in the `Sec-WebSocket-Accept` calculation.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Base64(SHA-1(key + GUID))`.
///
/// # Example
///
/// ```
/// use rswire::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Transport(format!("random source unavailable: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// What the server agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// `Sec-WebSocket-Accept` value.
    pub accept: String,
    /// Selected subprotocol, if any.
    pub protocol: Option<String>,
    /// Extensions announced by the server.
    pub extensions: Vec<String>,
}

/// An upgrade request ready to send, plus the key needed to check the reply.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    key: String,
    request: Vec<u8>,
}

impl ClientHandshake {
    /// Build the upgrade request for `url` with a fresh key.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if no key can be generated
    /// - [`Error::Parse`] if a configured header cannot be serialized
    pub fn new(url: &Url, config: &Config) -> Result<Self> {
        Self::with_key(url, config, generate_key()?)
    }

    /// Build the upgrade request with a caller-chosen key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if a configured header cannot be serialized.
    pub fn with_key(url: &Url, config: &Config, key: String) -> Result<Self> {
        let mut headers = HeaderTable::new();
        headers.append("Content-Length", "0");
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "upgrade");
        headers.append("Sec-WebSocket-Key", key.as_str());
        headers.append("Sec-WebSocket-Version", config.version.to_string());
        if let Some(protocol) = &config.protocol {
            headers.append("Sec-WebSocket-Protocol", protocol.as_str());
        }
        for (name, value) in &config.headers {
            headers.append(name.as_str(), value.as_str());
        }

        let mut request = Vec::with_capacity(256);
        write_request_head(&mut request, "GET", url, &headers)?;
        Ok(Self { key, request })
    }

    /// The `Sec-WebSocket-Key` sent.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialized request bytes.
    #[must_use]
    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// Accept value a conforming server must answer with.
    #[must_use]
    pub fn expected_accept(&self) -> String {
        compute_accept_key(&self.key)
    }

    /// Check the server's response head.
    ///
    /// Requires status 101 and a `Sec-WebSocket-Accept` header; with
    /// `verify_accept` the header must also match [`expected_accept`](Self::expected_accept).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if any requirement fails.
    pub fn validate(
        &self,
        message: &HttpMessage,
        headers: &HeaderTable,
        verify_accept: bool,
    ) -> Result<HandshakeResponse> {
        match message.status_code() {
            Some(101) => {}
            Some(code) => {
                return Err(Error::InvalidHandshake(format!(
                    "server answered {code} {}",
                    message.reason().unwrap_or_default()
                )));
            }
            None => {
                return Err(Error::InvalidHandshake(
                    "response has no status line".into(),
                ));
            }
        }

        let accept = headers
            .get("Sec-WebSocket-Accept")
            .ok_or_else(|| Error::InvalidHandshake("missing Sec-WebSocket-Accept".into()))?;
        if accept != self.expected_accept() {
            warn!(accept, enforced = verify_accept, "Sec-WebSocket-Accept mismatch");
            if verify_accept {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Accept mismatch: got {accept}"
                )));
            }
        }

        let response = HandshakeResponse {
            accept: accept.to_string(),
            protocol: headers.get("Sec-WebSocket-Protocol").map(str::to_string),
            extensions: headers
                .get_all("Sec-WebSocket-Extensions")
                .iter()
                .flat_map(|value| value.split(','))
                .map(|ext| ext.trim().to_string())
                .filter(|ext| !ext.is_empty())
                .collect(),
        };
        debug!(protocol = ?response.protocol, "handshake accepted");
        Ok(response)
    }
}
