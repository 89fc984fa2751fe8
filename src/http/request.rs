//! Request head serialization.

use super::header::HeaderTable;
use crate::error::{Error, Result};
use crate::url::Url;

/// Value for the `Host` header: the port is omitted when it is the scheme
/// default.
#[must_use]
pub fn host_header(url: &Url) -> String {
    let default = if url.is_secure() { 443 } else { 80 };
    if url.port == default {
        url.host.clone()
    } else {
        format!("{}:{}", url.host, url.port)
    }
}

/// Reject values that would break out of a header line.
fn validate_header_value(value: &str) -> Result<()> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(Error::Parse(format!(
            "header value contains control characters: {value:?}"
        )));
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
    {
        return Err(Error::Parse(format!("invalid header name: {name:?}")));
    }
    Ok(())
}

/// Serialize `METHOD target HTTP/1.1`, `Host`, then `headers`, then the
/// blank line.
///
/// A `Host` entry in `headers` replaces the one derived from `url`.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the method, a header name or a header value
/// contains characters that cannot appear on the wire.
pub fn write_request_head(
    out: &mut Vec<u8>,
    method: &str,
    url: &Url,
    headers: &HeaderTable,
) -> Result<()> {
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(Error::Parse(format!("invalid method: {method:?}")));
    }
    for (name, value) in headers.pairs() {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }

    out.extend_from_slice(method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(url.request_target().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    if !headers.contains("Host") {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(host_header(url).as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    headers.write_to(out);
    out.extend_from_slice(b"\r\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_head_layout() {
        let url = Url::parse("http://example.com/index.html?q=1").unwrap();
        let headers: HeaderTable = [("Accept", "*/*")].into_iter().collect();
        let mut out = Vec::new();
        write_request_head(&mut out, "GET", &url, &headers).unwrap();
        assert_eq!(
            out,
            b"GET /index.html?q=1 HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn test_host_header_with_port() {
        let url = Url::parse("ws://localhost:9001/").unwrap();
        assert_eq!(host_header(&url), "localhost:9001");
        let url = Url::parse("wss://example.com/").unwrap();
        assert_eq!(host_header(&url), "example.com");
    }

    #[test]
    fn test_explicit_host_wins() {
        let url = Url::parse("http://10.0.0.1/").unwrap();
        let headers: HeaderTable = [("Host", "virtual.example")].into_iter().collect();
        let mut out = Vec::new();
        write_request_head(&mut out, "GET", &url, &headers).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Host:").count(), 1);
        assert!(text.contains("Host: virtual.example\r\n"));
    }

    #[test]
    fn test_rejects_header_injection() {
        let url = Url::parse("http://h/").unwrap();
        let headers: HeaderTable = [("X-Bad", "a\r\nInjected: 1")].into_iter().collect();
        let mut out = Vec::new();
        assert!(matches!(
            write_request_head(&mut out, "GET", &url, &headers),
            Err(Error::Parse(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_rejects_bad_method() {
        let url = Url::parse("http://h/").unwrap();
        let mut out = Vec::new();
        assert!(write_request_head(&mut out, "get it", &url, &HeaderTable::new()).is_err());
    }
}
