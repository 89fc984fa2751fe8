//! Close codes and close-frame payloads.

use crate::error::{Error, Result};

/// Close status code (RFC 6455 section 7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    UnsupportedData,
    /// 1007
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    /// Any other value.
    Other(u16),
}

impl CloseCode {
    /// Map a numeric code.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }

    /// Whether an endpoint may put this code on the wire.
    ///
    /// 1004-1006 and 1015 are reserved for local use.
    #[must_use]
    pub const fn is_sendable(self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Status code and reason carried by a CLOSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code.
    pub code: CloseCode,
    /// UTF-8 reason, at most 123 bytes on the wire.
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Serialize as a CLOSE payload: big-endian code then the reason.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the code is reserved or the
    /// reason does not fit in a control frame.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        if !self.code.is_sendable() {
            return Err(Error::ProtocolViolation(format!(
                "close code {} cannot be sent",
                self.code.as_u16()
            )));
        }
        if self.reason.len() > 123 {
            return Err(Error::ProtocolViolation(format!(
                "close reason of {} bytes",
                self.reason.len()
            )));
        }
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        Ok(payload)
    }

    /// Parse a CLOSE payload. An empty payload carries no status.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFrame`] for a one-byte payload
    /// - [`Error::InvalidUtf8`] if the reason is not UTF-8
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        match payload {
            [] => Ok(None),
            [_] => Err(Error::InvalidFrame("one-byte close payload".into())),
            [hi, lo, reason @ ..] => Ok(Some(Self {
                code: CloseCode::from_u16(u16::from_be_bytes([*hi, *lo])),
                reason: std::str::from_utf8(reason)?.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1011), CloseCode::InternalError);
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
        assert_eq!(CloseCode::GoingAway.as_u16(), 1001);
    }

    #[test]
    fn test_close_code_sendable() {
        assert!(CloseCode::Normal.is_sendable());
        assert!(CloseCode::Other(3000).is_sendable());
        assert!(!CloseCode::Other(1005).is_sendable());
        assert!(!CloseCode::Other(1015).is_sendable());
        assert!(!CloseCode::Other(999).is_sendable());
    }

    #[test]
    fn test_close_payload() {
        let frame = CloseFrame::new(CloseCode::Normal, "bye");
        let payload = frame.to_payload().unwrap();
        assert_eq!(payload, [0x03, 0xe8, b'b', b'y', b'e']);
        assert_eq!(CloseFrame::parse(&payload).unwrap(), Some(frame));
    }

    #[test]
    fn test_close_payload_errors() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);
        assert!(CloseFrame::parse(&[0x03]).is_err());
        assert_eq!(CloseFrame::parse(&[0x03, 0xe8, 0xff]), Err(Error::InvalidUtf8));
        assert!(CloseFrame::new(CloseCode::Other(1006), "").to_payload().is_err());
        assert!(CloseFrame::new(CloseCode::Normal, "x".repeat(124)).to_payload().is_err());
    }
}
