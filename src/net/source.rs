//! Byte sources consumed by the HTTP reader and the frame decoder.

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};

/// A pull-based byte stream.
///
/// `recv` returning `Ok(0)` signals end of stream.
pub trait ByteSource {
    /// Receive up to `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the underlying stream fails.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Fill `buf` completely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the stream ends first.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.recv(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::Transport(format!(
                    "unexpected end of stream after {filled} of {} bytes",
                    buf.len()
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Receive a single byte, `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the underlying stream fails.
    fn recv_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.recv(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Receive one line terminated by `\n`, with trailing CR/LF stripped.
    ///
    /// Returns `None` if the stream ends before any byte arrives; a partial
    /// line cut short by end of stream is returned as-is.
    ///
    /// # Errors
    ///
    /// - [`Error::HeaderTooLarge`] if the line exceeds `max_len` bytes
    /// - a transport-class error if the underlying stream fails
    fn recv_line(&mut self, max_len: usize) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        loop {
            match self.recv_byte()? {
                None if line.is_empty() => return Ok(None),
                None => break,
                Some(b'\n') => break,
                Some(byte) => {
                    if line.len() >= max_len {
                        return Err(Error::HeaderTooLarge {
                            size: line.len() + 1,
                            max: max_len,
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
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).recv(buf)
    }
}

impl ByteSource for &[u8] {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        Ok(n)
    }
}

/// Read-ahead buffer in front of another source.
///
/// Bytes pulled from the inner source but not yet handed out stay here, so
/// switching from HTTP parsing to frame decoding on the same stream never
/// loses data.
#[derive(Debug)]
pub struct Buffered<S> {
    inner: S,
    buf: BytesMut,
    capacity: usize,
}

impl<S: ByteSource> Buffered<S> {
    /// Wrap `inner` with a read-ahead buffer of `capacity` bytes.
    #[must_use]
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the inner source.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Mutably borrow the inner source.
    ///
    /// Reading from it directly skips any buffered bytes.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: ByteSource> ByteSource for Buffered<S> {
    fn recv(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.buf.is_empty() {
            if out.len() >= self.capacity {
                return self.inner.recv(out);
            }
            self.buf.resize(self.capacity, 0);
            let n = match self.inner.recv(&mut self.buf) {
                Ok(n) => n,
                Err(err) => {
                    self.buf.clear();
                    return Err(err);
                }
            };
            self.buf.truncate(n);
            if n == 0 {
                return Ok(0);
            }
        }
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that hands out at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl ByteSource for Trickle<'_> {
        fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.step).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_recv_line_strips_crlf() {
        let mut src: &[u8] = b"HTTP/1.1 200 OK\r\nNext\n";
        assert_eq!(src.recv_line(64).unwrap().unwrap(), b"HTTP/1.1 200 OK");
        assert_eq!(src.recv_line(64).unwrap().unwrap(), b"Next");
        assert_eq!(src.recv_line(64).unwrap(), None);
    }

    #[test]
    fn test_recv_line_partial_at_eof() {
        let mut src: &[u8] = b"tail";
        assert_eq!(src.recv_line(64).unwrap().unwrap(), b"tail");
    }

    #[test]
    fn test_recv_line_too_long() {
        let mut src: &[u8] = b"abcdefgh\r\n";
        assert!(matches!(
            src.recv_line(4),
            Err(Error::HeaderTooLarge { max: 4, .. })
        ));
    }

    #[test]
    fn test_recv_exact_eof() {
        let mut src: &[u8] = b"abc";
        let mut buf = [0u8; 4];
        assert!(matches!(src.recv_exact(&mut buf), Err(Error::Transport(_))));
    }

    #[test]
    fn test_buffered_preserves_leftover() {
        let data = b"line one\r\nrest of stream";
        let mut src = Buffered::new(Trickle { data, step: 64 }, 32);
        assert_eq!(src.recv_line(64).unwrap().unwrap(), b"line one");
        assert_eq!(src.buffered(), b"rest of stream".len());

        let mut rest = [0u8; 14];
        src.recv_exact(&mut rest).unwrap();
        assert_eq!(&rest, b"rest of stream");
        assert_eq!(src.recv_byte().unwrap(), None);
    }

    #[test]
    fn test_buffered_large_read_bypasses_buffer() {
        let data = [7u8; 100];
        let mut src = Buffered::new(Trickle { data: &data, step: 100 }, 8);
        let mut out = [0u8; 50];
        assert_eq!(src.recv(&mut out).unwrap(), 50);
        assert_eq!(src.buffered(), 0);
    }
}
