//! Frame opcodes.

use crate::error::{Error, Result};

/// Frame opcode (low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message (0x0).
    Continuation = 0x0,
    /// UTF-8 text (0x1).
    Text = 0x1,
    /// Arbitrary bytes (0x2).
    Binary = 0x2,
    /// Close (0x8). Ends the read loop.
    Close = 0x8,
    /// Ping (0x9).
    Ping = 0x9,
    /// Pong (0xA).
    Pong = 0xA,
}

impl OpCode {
    /// Decode a 4-bit opcode.
    ///
    /// # Errors
    ///
    /// - [`Error::ReservedOpcode`] for 0x3-0x7 and 0xB-0xF
    /// - [`Error::InvalidOpcode`] for values wider than 4 bits
    pub const fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            0x3..=0x7 | 0xB..=0xF => Err(Error::ReservedOpcode(byte)),
            _ => Err(Error::InvalidOpcode(byte)),
        }
    }

    /// Raw opcode value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }

    /// Continuation, Text and Binary.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }

    /// Opcode name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Continuation => "Continuation",
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        Self::from_u8(byte)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for op in [
            OpCode::Continuation,
            OpCode::Text,
            OpCode::Binary,
            OpCode::Close,
            OpCode::Ping,
            OpCode::Pong,
        ] {
            assert_eq!(OpCode::from_u8(op.as_u8()).unwrap(), op);
        }
    }

    #[test]
    fn test_opcode_reserved() {
        for reserved in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert_eq!(OpCode::from_u8(reserved), Err(Error::ReservedOpcode(reserved)));
        }
        assert_eq!(OpCode::try_from(0x10), Err(Error::InvalidOpcode(0x10)));
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(OpCode::Continuation.is_data());
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(OpCode::Ping.to_string(), "Ping");
    }
}
