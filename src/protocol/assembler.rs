//! Reassembly of fragmented messages.
//!
//! Data frames are buffered until a FIN frame completes the message; control
//! frames pass straight through, even between fragments.

use bytes::BytesMut;
use tracing::warn;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::frame::FrameHeader;

/// Joins continuation frames into whole messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    limits: Limits,
}

/// A message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// For reassembled messages: FIN set, the opcode of the first fragment
    /// and the total length. Otherwise the frame's own header.
    pub header: FrameHeader,
    /// Message payload.
    pub payload: Vec<u8>,
}

impl AssembledMessage {
    /// Payload as text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] if the payload is not UTF-8.
    pub fn into_text(self) -> Result<String> {
        String::from_utf8(self.payload).map_err(|_| Error::InvalidUtf8)
    }
}

impl MessageAssembler {
    /// Create an assembler bounded by `limits.max_message_size`.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            limits,
        }
    }

    /// Feed one decoded frame.
    ///
    /// Returns `Some` when a message is complete (or for any control frame),
    /// `None` while fragments are still being collected.
    ///
    /// # Errors
    ///
    /// - [`Error::ProtocolViolation`] for a continuation with nothing to
    ///   continue, a new data frame in the middle of a message, or a
    ///   malformed control frame
    /// - [`Error::MessageTooLarge`] if the message outgrows the limit
    /// - [`Error::InvalidUtf8`] if a completed text message is not UTF-8
    pub fn push(&mut self, header: &FrameHeader, payload: Vec<u8>) -> Result<Option<AssembledMessage>> {
        if header.opcode.is_control() {
            header.check_control()?;
            return Ok(Some(AssembledMessage {
                header: header.clone(),
                payload,
            }));
        }

        if header.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                warn!(len = payload.len(), "unsolicited continuation frame");
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in progress".into(),
                ));
            }
        } else if self.opcode.is_some() {
            warn!(opcode = %header.opcode, "data frame interrupts a fragmented message");
            return Err(Error::ProtocolViolation(format!(
                "{} frame while a fragmented message is in progress",
                header.opcode
            )));
        }

        let new_size = self.buffer.len() + payload.len();
        self.limits.check_message_size(new_size)?;

        let opcode = self.opcode.unwrap_or(header.opcode);

        if header.fin && self.opcode.is_none() {
            // Unfragmented: deliver without copying.
            if opcode == OpCode::Text {
                std::str::from_utf8(&payload)?;
            }
            return Ok(Some(AssembledMessage {
                header: header.clone(),
                payload,
            }));
        }

        self.opcode = Some(opcode);
        self.buffer.extend_from_slice(&payload);
        self.fragment_count += 1;

        if !header.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        let fragments = self.fragment_count;
        self.reset();
        if opcode == OpCode::Text {
            std::str::from_utf8(&payload)?;
        }

        let mut header = FrameHeader::new(true, opcode, payload.len() as u64);
        header.consumed = header.payload_len;
        header.eof = true;
        tracing::trace!(%opcode, fragments, len = payload.len(), "message reassembled");
        Ok(Some(AssembledMessage { header, payload }))
    }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fin: bool, opcode: OpCode, payload: &[u8]) -> (FrameHeader, Vec<u8>) {
        let mut header = FrameHeader::new(fin, opcode, payload.len() as u64);
        header.consumed = header.payload_len;
        header.eof = true;
        (header, payload.to_vec())
    }

    fn push(
        assembler: &mut MessageAssembler,
        fin: bool,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<Option<AssembledMessage>> {
        let (header, payload) = frame(fin, opcode, payload);
        assembler.push(&header, payload)
    }

    #[test]
    fn test_single_frame_message() {
        let mut assembler = MessageAssembler::new(Limits::default());
        let msg = push(&mut assembler, true, OpCode::Text, b"Hello")
            .unwrap()
            .unwrap();
        assert_eq!(msg.header.opcode, OpCode::Text);
        assert_eq!(msg.payload, b"Hello");
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_fragmented_message() {
        let mut assembler = MessageAssembler::new(Limits::default());
        assert!(push(&mut assembler, false, OpCode::Binary, b"ab").unwrap().is_none());
        assert!(assembler.is_assembling());
        assert!(push(&mut assembler, false, OpCode::Continuation, b"cd").unwrap().is_none());
        let msg = push(&mut assembler, true, OpCode::Continuation, b"ef")
            .unwrap()
            .unwrap();

        assert_eq!(msg.payload, b"abcdef");
        assert!(msg.header.fin);
        assert_eq!(msg.header.opcode, OpCode::Binary);
        assert_eq!(msg.header.payload_len, 6);
        assert!(!assembler.is_assembling());
    }

    #[test]
    fn test_control_frame_between_fragments() {
        let mut assembler = MessageAssembler::new(Limits::default());
        assert!(push(&mut assembler, false, OpCode::Text, b"Hel").unwrap().is_none());

        let ping = push(&mut assembler, true, OpCode::Ping, b"p").unwrap().unwrap();
        assert_eq!(ping.header.opcode, OpCode::Ping);
        assert!(assembler.is_assembling());

        let msg = push(&mut assembler, true, OpCode::Continuation, b"lo")
            .unwrap()
            .unwrap();
        assert_eq!(msg.into_text().unwrap(), "Hello");
    }

    #[test]
    fn test_unexpected_continuation() {
        let mut assembler = MessageAssembler::new(Limits::default());
        let mut result = Ok(None);
        let logged = crate::test_support::capture_logs(|| {
            result = push(&mut assembler, true, OpCode::Continuation, b"x");
        });
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert!(logged.contains("WARN"), "{logged}");
        assert!(logged.contains("unsolicited continuation frame"), "{logged}");
    }

    #[test]
    fn test_interleaved_data_frame() {
        let mut assembler = MessageAssembler::new(Limits::default());
        push(&mut assembler, false, OpCode::Text, b"a").unwrap();
        assert!(matches!(
            push(&mut assembler, true, OpCode::Binary, b"b"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_message_too_large() {
        let mut assembler = MessageAssembler::new(Limits::new(1024, 4, 8192, 8192));
        push(&mut assembler, false, OpCode::Binary, b"abc").unwrap();
        assert!(matches!(
            push(&mut assembler, true, OpCode::Continuation, b"de"),
            Err(Error::MessageTooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let mut assembler = MessageAssembler::new(Limits::default());
        assert_eq!(
            push(&mut assembler, true, OpCode::Text, &[0xff, 0xfe]),
            Err(Error::InvalidUtf8)
        );
        push(&mut assembler, false, OpCode::Text, &[0xe2, 0x82]).unwrap();
        let msg = push(&mut assembler, true, OpCode::Continuation, &[0xac])
            .unwrap()
            .unwrap();
        assert_eq!(msg.into_text().unwrap(), "\u{20ac}");
    }

    #[test]
    fn test_fragmented_control_rejected() {
        let mut assembler = MessageAssembler::new(Limits::default());
        assert!(matches!(
            push(&mut assembler, false, OpCode::Ping, b""),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
