//! URL structure consumed by the HTTP and WebSocket clients.
//!
//! Only the `scheme://host[:port][/path][?query][#hash]` shape is supported.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed URL.
///
/// `query` keeps its leading `?` and `hash` its leading `#`, so the request
/// target is the plain concatenation `path + query + hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    /// Scheme without `://` (e.g. `wss`).
    pub protocol: String,
    /// Host name or address literal.
    pub host: String,
    /// Explicit port, or the scheme default.
    pub port: u16,
    /// Path, `/` when absent.
    pub path: String,
    /// Query including the leading `?`, empty when absent.
    pub query: String,
    /// Fragment including the leading `#`, empty when absent.
    pub hash: String,
}

impl Url {
    /// Parse a URL string.
    ///
    /// Default ports are 443 for `https`/`wss`, 21 for `ftp` and 80 otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the scheme or host is missing, the
    /// scheme contains non-alphabetic characters, or the port is not a number.
    pub fn parse(input: &str) -> Result<Self> {
        let (protocol, rest) = input
            .split_once("://")
            .ok_or_else(|| Error::InvalidUrl(format!("missing scheme separator: {input}")))?;

        if protocol.is_empty() || !protocol.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(Error::InvalidUrl(format!("invalid scheme: {protocol:?}")));
        }

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let (authority, rest) = rest.split_at(authority_end);

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(Error::InvalidUrl(format!("invalid port: {port:?}")));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidUrl(format!("port out of range: {port}")))?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        if host.is_empty() {
            return Err(Error::InvalidUrl(format!("missing host: {input}")));
        }

        let (before_hash, hash) = match rest.find('#') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let (path, query) = match before_hash.find('?') {
            Some(idx) => before_hash.split_at(idx),
            None => (before_hash, ""),
        };

        let port = port.unwrap_or_else(|| default_port(protocol));
        let path = if path.is_empty() { "/" } else { path };

        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            query: query.to_string(),
            hash: hash.to_string(),
        })
    }

    /// Whether the scheme implies an encrypted transport.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https") || self.protocol.eq_ignore_ascii_case("wss")
    }

    /// The request target sent on the request line.
    #[must_use]
    pub fn request_target(&self) -> String {
        format!("{}{}{}", self.path, self.query, self.hash)
    }
}

fn default_port(protocol: &str) -> u16 {
    if protocol.eq_ignore_ascii_case("https") || protocol.eq_ignore_ascii_case("wss") {
        443
    } else if protocol.eq_ignore_ascii_case("ftp") {
        21
    } else {
        80
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.protocol,
            self.host,
            self.port,
            self.request_target()
        )
    }
}
