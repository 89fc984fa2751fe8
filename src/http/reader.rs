//! Incremental HTTP/1.1 message reader.
//!
//! Reads a start line and header block from a [`ByteSource`], then delivers
//! the body on demand, decoding `Content-Length` and `chunked` framing.
//!
//! Transport failures while reading the body end the body (the message
//! becomes final) instead of surfacing as errors; malformed framing is
//! always an error.

use std::io;

use tracing::{debug, trace};

use super::header::HeaderTable;
use crate::config::Limits;
use crate::error::{Error, Result};
use crate::net::ByteSource;

/// First line of an HTTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD target HTTP/x.y`
    Request {
        /// Request method.
        method: String,
        /// Request target.
        target: String,
        /// Protocol version, e.g. `HTTP/1.1`.
        version: String,
    },
    /// `HTTP/x.y code reason`
    Status {
        /// Protocol version, e.g. `HTTP/1.1`.
        version: String,
        /// Status code.
        code: u16,
        /// Reason phrase, possibly empty.
        reason: String,
    },
}

impl StartLine {
    /// Classify a start line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the line is neither a request line nor a
    /// status line.
    pub fn parse(line: &str) -> Result<Self> {
        if line.starts_with("HTTP/") {
            let mut parts = line.splitn(3, ' ');
            let version = parts.next().unwrap_or_default();
            let code = parts.next().unwrap_or_default();
            let reason = parts.next().unwrap_or_default();

            if !is_version(version) || code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::Parse(format!("malformed status line: {line:?}")));
            }
            let code = code
                .parse()
                .map_err(|_| Error::Parse(format!("malformed status code: {code:?}")))?;
            return Ok(StartLine::Status {
                version: version.to_string(),
                code,
                reason: reason.to_string(),
            });
        }

        let parts: Vec<&str> = line.split(' ').collect();
        match parts.as_slice() {
            [method, target, version]
                if !method.is_empty()
                    && method.bytes().all(|b| b.is_ascii_uppercase())
                    && !target.is_empty()
                    && is_version(version) =>
            {
                Ok(StartLine::Request {
                    method: (*method).to_string(),
                    target: (*target).to_string(),
                    version: (*version).to_string(),
                })
            }
            _ => Err(Error::Parse(format!("malformed start line: {line:?}"))),
        }
    }
}

fn is_version(s: &str) -> bool {
    s.strip_prefix("HTTP/1.")
        .is_some_and(|minor| minor.len() == 1 && minor.as_bytes()[0].is_ascii_digit())
}

/// Parse state of an HTTP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    /// Nothing read yet.
    #[default]
    Start,
    /// Start line classified, header fields being read.
    HeaderBlock,
    /// Delivering a `Content-Length` body.
    ContentLength,
    /// Delivering a `chunked` body.
    Chunked,
    /// Message complete.
    Done,
}

/// Progress of the message being read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    /// Current parse state.
    pub state: ReadState,
    /// Classified start line, once read.
    pub start_line: Option<StartLine>,
    /// Declared `Content-Length`.
    pub content_length: Option<u64>,
    /// Body framed with chunked transfer coding.
    pub chunked: bool,
    /// Bytes left in the current chunk.
    pub chunk_remaining: u64,
    /// Body bytes delivered so far.
    pub delivered: u64,
}

impl HttpMessage {
    /// Whether the header block has been fully read.
    #[must_use]
    pub fn header_parsed(&self) -> bool {
        !matches!(self.state, ReadState::Start | ReadState::HeaderBlock)
    }

    /// Whether no further body bytes will be delivered.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.state == ReadState::Done
    }

    /// Whether the body uses chunked transfer coding.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Status code of a response.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match &self.start_line {
            Some(StartLine::Status { code, .. }) => Some(*code),
            _ => None,
        }
    }

    /// Reason phrase of a response.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match &self.start_line {
            Some(StartLine::Status { reason, .. }) => Some(reason),
            _ => None,
        }
    }

    /// Method of a request.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            Some(StartLine::Request { method, .. }) => Some(method),
            _ => None,
        }
    }

    /// Target of a request.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match &self.start_line {
            Some(StartLine::Request { target, .. }) => Some(target),
            _ => None,
        }
    }
}

/// Reads one HTTP message from a byte source.
#[derive(Debug)]
pub struct HttpReader<S> {
    source: S,
    message: HttpMessage,
    headers: HeaderTable,
    limits: Limits,
}

impl<S: ByteSource> HttpReader<S> {
    /// Create a reader; nothing is read until [`read_head`](Self::read_head).
    #[must_use]
    pub fn new(source: S, limits: Limits) -> Self {
        Self {
            source,
            message: HttpMessage::default(),
            headers: HeaderTable::new(),
            limits,
        }
    }

    /// Progress of the current message.
    #[must_use]
    pub fn message(&self) -> &HttpMessage {
        &self.message
    }

    /// Header fields read so far.
    #[must_use]
    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    /// Borrow the source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Mutably borrow the source.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Recover the source, positioned after whatever has been consumed.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Read the start line and header block.
    ///
    /// Calling it again after the head is parsed does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] if the start line, a header field or
    ///   `Content-Length` is malformed
    /// - [`Error::HeaderTooLarge`] if a line or the whole block is too long
    /// - a transport-class error if the stream fails or ends early
    pub fn read_head(&mut self) -> Result<&HttpMessage> {
        if self.message.state == ReadState::Start {
            let line = self
                .source
                .recv_line(self.limits.max_line_length)?
                .ok_or_else(|| Error::Transport("connection closed before start line".into()))?;
            let line = String::from_utf8(line)
                .map_err(|_| Error::Parse("start line is not valid UTF-8".into()))?;
            if line.is_empty() {
                return Err(Error::Parse("empty start line".into()));
            }
            trace!(line = %line, "start line");

            self.message.start_line = Some(StartLine::parse(&line)?);
            self.message.state = ReadState::HeaderBlock;
        }

        if self.message.state == ReadState::HeaderBlock {
            self.read_fields()?;
            self.select_body_mode()?;
        }
        Ok(&self.message)
    }

    fn read_fields(&mut self) -> Result<()> {
        let mut total = 0usize;
        loop {
            let line = self
                .source
                .recv_line(self.limits.max_line_length)?
                .ok_or_else(|| Error::Transport("connection closed inside header block".into()))?;
            if line.is_empty() {
                return Ok(());
            }
            total += line.len() + 2;
            self.limits.check_header_size(total)?;

            let line = std::str::from_utf8(&line)
                .map_err(|_| Error::Parse("header field is not valid UTF-8".into()))?;
            let (name, value) = parse_field(line)?;
            self.headers.append(name, value);
        }
    }

    fn select_body_mode(&mut self) -> Result<()> {
        if let Some(value) = self.headers.get("Content-Length") {
            let length = value
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::Parse(format!("invalid Content-Length: {value:?}")))?;
            self.message.content_length = Some(length);
            self.message.state = if length == 0 {
                ReadState::Done
            } else {
                ReadState::ContentLength
            };
        } else if self.declares_chunked() {
            self.message.chunked = true;
            self.message.state = ReadState::Chunked;
        } else {
            self.message.state = ReadState::Done;
        }
        debug!(
            status = ?self.message.status_code(),
            state = ?self.message.state,
            content_length = ?self.message.content_length,
            "header block parsed"
        );
        Ok(())
    }

    fn declares_chunked(&self) -> bool {
        self.headers
            .get_all("Transfer-Encoding")
            .iter()
            .flat_map(|value| value.split(','))
            .next_back()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Read body bytes into `buf`.
    ///
    /// Returns `Ok(0)` once the body is complete, when the head has not been
    /// read yet, or when the transport fails mid-body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if a chunk-size line is malformed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.message.state {
            ReadState::ContentLength => Ok(self.read_sized(buf)),
            ReadState::Chunked => self.read_chunked(buf),
            ReadState::Start | ReadState::HeaderBlock | ReadState::Done => Ok(0),
        }
    }

    fn read_sized(&mut self, buf: &mut [u8]) -> usize {
        let declared = self.message.content_length.unwrap_or(0);
        let remaining = declared.saturating_sub(self.message.delivered);
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));

        match self.source.recv(&mut buf[..want]) {
            Ok(0) => {
                self.message.state = ReadState::Done;
                0
            }
            Ok(n) => {
                self.message.delivered += n as u64;
                if self.message.delivered >= declared {
                    self.message.state = ReadState::Done;
                }
                n
            }
            Err(err) => {
                debug!(error = %err, "body read failed, ending body");
                self.message.state = ReadState::Done;
                0
            }
        }
    }

    fn read_chunked(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.message.chunk_remaining == 0 {
            let size = match self.source.recv_line(self.limits.max_line_length) {
                Ok(Some(line)) => parse_chunk_size(&line)?,
                Ok(None) => {
                    self.message.state = ReadState::Done;
                    return Ok(0);
                }
                Err(err) if err.is_transport() => {
                    debug!(error = %err, "chunk-size read failed, ending body");
                    self.message.state = ReadState::Done;
                    return Ok(0);
                }
                Err(err) => return Err(err),
            };
            trace!(size, "chunk");

            if size == 0 {
                self.skip_trailers();
                self.message.state = ReadState::Done;
                return Ok(0);
            }
            self.message.chunk_remaining = size;
        }

        let want = usize::try_from(self.message.chunk_remaining)
            .map_or(buf.len(), |r| r.min(buf.len()));
        let n = match self.source.recv(&mut buf[..want]) {
            Ok(0) => {
                self.message.state = ReadState::Done;
                return Ok(0);
            }
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "chunk read failed, ending body");
                self.message.state = ReadState::Done;
                return Ok(0);
            }
        };
        self.message.delivered += n as u64;
        self.message.chunk_remaining -= n as u64;

        if self.message.chunk_remaining == 0 {
            let mut crlf = [0u8; 2];
            if self.source.recv_exact(&mut crlf).is_err() {
                self.message.state = ReadState::Done;
            }
        }
        Ok(n)
    }

    fn skip_trailers(&mut self) {
        loop {
            match self.source.recv_line(self.limits.max_line_length) {
                Ok(Some(line)) if !line.is_empty() => {}
                _ => return,
            }
        }
    }

    /// Drain the rest of the body.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] if chunk framing is malformed
    /// - [`Error::MessageTooLarge`] if the body exceeds the message limit
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut chunk = vec![0u8; 8192];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&chunk[..n]);
            self.limits.check_message_size(body.len())?;
        }
    }

    /// Read a single body byte, `None` once the body is complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if chunk framing is malformed.
    pub fn read_body_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Read one body line with trailing CR/LF stripped.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] if chunk framing is malformed
    /// - [`Error::HeaderTooLarge`] if the line exceeds the line limit
    pub fn read_body_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            match self.read_body_byte()? {
                None if line.is_empty() => return Ok(None),
                None | Some(b'\n') => break,
                Some(byte) => {
                    if line.len() >= self.limits.max_line_length {
                        return Err(Error::HeaderTooLarge {
                            size: line.len() + 1,
                            max: self.limits.max_line_length,
                        });
                    }
                    line.push(byte);
                }
            }
        }
        while line.last().is_some_and(|b| *b == b'\r' || *b == b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Fill as much of `buf` as the body allows.
    ///
    /// Returns the number of bytes written, less than `buf.len()` only when
    /// the body ended first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if chunk framing is malformed.
    pub fn read_body_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl<S: ByteSource> io::Read for HttpReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        HttpReader::read(self, buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Split a `Name: value` field, trimming surrounding whitespace.
fn parse_field(line: &str) -> Result<(&str, &str)> {
    if line.starts_with([' ', '\t']) {
        return Err(Error::Parse(format!("obsolete line folding: {line:?}")));
    }
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::Parse(format!("malformed header field: {line:?}")))?;
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return Err(Error::Parse(format!("invalid header name: {name:?}")));
    }
    Ok((name, value.trim()))
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Parse a chunk-size line, ignoring chunk extensions.
fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Parse("chunk-size line is not valid UTF-8".into()))?;
    let digits = text.split(';').next().unwrap_or_default().trim();
    if digits.is_empty() || digits.len() > 16 {
        return Err(Error::Parse(format!("invalid chunk size: {text:?}")));
    }
    u64::from_str_radix(digits, 16).map_err(|_| Error::Parse(format!("invalid chunk size: {text:?}")))
}
