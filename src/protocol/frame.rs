//! Frame header codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                  Masking key (if MASK is set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Headers are decoded either from a complete buffer ([`FrameHeader::parse`])
//! or field by field from a [`ByteSource`] ([`FrameHeader::read_from`]).
//! Payloads are then pulled incrementally, unmasking as they arrive.

use bytes::{BufMut, BytesMut};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::net::ByteSource;
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: u64 = 125;

/// Decoded frame header plus payload read progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of a message.
    pub fin: bool,
    /// RSV1-RSV3 bits, right-aligned.
    pub rsv: u8,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Whether the payload is masked.
    pub masked: bool,
    /// Resolved payload length.
    pub payload_len: u64,
    /// Masking key, zero when unmasked.
    pub mask: [u8; 4],
    /// Payload bytes consumed so far.
    pub consumed: u64,
    /// Whether the whole payload has been consumed.
    pub eof: bool,
}

/// Encoded header size for a payload of `payload_len` bytes.
#[must_use]
pub const fn header_len(payload_len: u64, masked: bool) -> usize {
    let extended = if payload_len < 126 {
        0
    } else if payload_len < 65536 {
        2
    } else {
        8
    };
    2 + extended + if masked { 4 } else { 0 }
}

impl FrameHeader {
    /// Header for a payload that has not been read yet.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            masked: false,
            payload_len,
            mask: [0; 4],
            consumed: 0,
            eof: payload_len == 0,
        }
    }

    fn from_leading(byte0: u8, byte1: u8) -> Result<(Self, u8)> {
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let mut header = Self::new(byte0 & 0x80 != 0, opcode, 0);
        header.rsv = (byte0 >> 4) & 0x07;
        header.masked = byte1 & 0x80 != 0;
        Ok((header, byte1 & 0x7F))
    }

    fn set_len(&mut self, len: u64) {
        self.payload_len = len;
        self.eof = len == 0;
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns the header and the number of header bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if `buf` ends inside the header
    /// - [`Error::ReservedOpcode`] for a reserved opcode
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }
        let (mut header, len7) = Self::from_leading(buf[0], buf[1])?;

        let mut offset = 2;
        let len = match len7 {
            126 => {
                let bytes = take::<2>(buf, offset)?;
                offset += 2;
                u64::from(u16::from_be_bytes(bytes))
            }
            127 => {
                let bytes = take::<8>(buf, offset)?;
                offset += 8;
                u64::from_be_bytes(bytes)
            }
            n => u64::from(n),
        };
        header.set_len(len);

        if header.masked {
            header.mask = take::<4>(buf, offset)?;
            offset += 4;
        }
        Ok((header, offset))
    }

    /// Read a header from `src`: two leading bytes, the extended length if
    /// any, then the masking key if any.
    ///
    /// # Errors
    ///
    /// - a transport-class error if the stream fails or ends inside the header
    /// - [`Error::ReservedOpcode`] for a reserved opcode
    pub fn read_from<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self> {
        let mut leading = [0u8; 2];
        src.recv_exact(&mut leading)?;
        let (mut header, len7) = Self::from_leading(leading[0], leading[1])?;

        let len = match len7 {
            126 => {
                let mut bytes = [0u8; 2];
                src.recv_exact(&mut bytes)?;
                u64::from(u16::from_be_bytes(bytes))
            }
            127 => {
                let mut bytes = [0u8; 8];
                src.recv_exact(&mut bytes)?;
                u64::from_be_bytes(bytes)
            }
            n => u64::from(n),
        };
        header.set_len(len);

        if header.masked {
            src.recv_exact(&mut header.mask)?;
        }
        Ok(header)
    }

    /// Payload bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.payload_len - self.consumed
    }

    /// Number of bytes the header occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        header_len(self.payload_len, self.masked)
    }

    /// Reject control frames that are fragmented or too long.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a non-final control frame or
    /// one longer than 125 bytes.
    pub fn check_control(&self) -> Result<()> {
        if !self.opcode.is_control() {
            return Ok(());
        }
        if !self.fin {
            return Err(Error::ProtocolViolation(format!(
                "fragmented {} frame",
                self.opcode
            )));
        }
        if self.payload_len > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ProtocolViolation(format!(
                "{} frame payload of {} bytes",
                self.opcode, self.payload_len
            )));
        }
        Ok(())
    }

    /// Read up to `buf.len()` payload bytes, unmasking in place.
    ///
    /// Returns `Ok(0)` once the payload is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error if the stream fails or ends early.
    pub fn read_chunk<S: ByteSource + ?Sized>(&mut self, src: &mut S, buf: &mut [u8]) -> Result<usize> {
        let want = usize::try_from(self.remaining()).map_or(buf.len(), |r| r.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }
        let n = src.recv(&mut buf[..want])?;
        if n == 0 {
            return Err(Error::Transport(format!(
                "stream ended with {} payload bytes outstanding",
                self.remaining()
            )));
        }
        if self.masked {
            let offset = (self.consumed % 4) as usize;
            let mask = [
                self.mask[offset],
                self.mask[(offset + 1) % 4],
                self.mask[(offset + 2) % 4],
                self.mask[(offset + 3) % 4],
            ];
            apply_mask(&mut buf[..n], mask);
        }
        self.consumed += n as u64;
        self.eof = self.consumed == self.payload_len;
        Ok(n)
    }

    /// Read the whole remaining payload.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameTooLarge`] if the declared length exceeds the limit
    /// - a transport-class error if the stream fails or ends early
    pub fn read_payload<S: ByteSource + ?Sized>(&mut self, src: &mut S, limits: &Limits) -> Result<Vec<u8>> {
        limits.check_frame_size(self.payload_len)?;
        let len = usize::try_from(self.remaining()).map_err(|_| Error::FrameTooLarge {
            size: self.payload_len,
            max: limits.max_frame_size,
        })?;

        let mut payload = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            filled += self.read_chunk(src, &mut payload[filled..])?;
        }
        self.eof = true;
        Ok(payload)
    }
}

fn take<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    buf.get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(Error::IncompleteFrame {
            needed: offset + N - buf.len(),
        })
}

/// Encode one frame.
///
/// Lengths below 126 use the 7-bit field, lengths below 65536 the 16-bit
/// extension, anything else the 64-bit extension. With a mask the key is
/// written and the payload is masked.
#[must_use]
pub fn encode_frame(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: &[u8]) -> BytesMut {
    let len = payload.len() as u64;
    let mut buf = BytesMut::with_capacity(header_len(len, mask.is_some()) + payload.len());

    let fin_bit = if fin { 0x80 } else { 0x00 };
    buf.put_u8(fin_bit | opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        buf.put_u8(mask_bit | len as u8);
    } else if len < 65536 {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(payload),
    }
    buf
}

/// A complete frame held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            opcode,
            payload,
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Decode a complete frame from `buf`, unmasking the payload.
    ///
    /// Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteFrame`] if `buf` ends inside the frame
    /// - [`Error::ReservedOpcode`] for a reserved opcode
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, offset) = FrameHeader::parse(buf)?;
        let len = usize::try_from(header.payload_len).map_err(|_| Error::FrameTooLarge {
            size: header.payload_len,
            max: usize::MAX as u64,
        })?;
        let end = offset.checked_add(len).ok_or(Error::FrameTooLarge {
            size: header.payload_len,
            max: usize::MAX as u64,
        })?;
        if buf.len() < end {
            return Err(Error::IncompleteFrame {
                needed: end - buf.len(),
            });
        }

        let mut payload = buf[offset..end].to_vec();
        if header.masked {
            apply_mask(&mut payload, header.mask);
        }
        Ok((Self::new(header.fin, header.opcode, payload), end))
    }

    /// Encode with an optional mask.
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> BytesMut {
        encode_frame(self.fin, self.opcode, mask, &self.payload)
    }

    /// Encoded size.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        header_len(self.payload.len() as u64, masked) + self.payload.len()
    }
}
