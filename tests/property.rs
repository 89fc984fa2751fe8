//! Property-based tests for framing, masking, header tables and body decoding.
//!
//! These tests use proptest to fuzz the codecs and find edge cases.

use proptest::prelude::*;
use rswire::config::Limits;
use rswire::http::{HeaderTable, HttpReader};
use rswire::net::ByteSource;
use rswire::protocol::{Frame, FrameHeader, OpCode, apply_mask, apply_mask_fast, encode_frame};

/// Strategy for generating valid data frame opcodes.
fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Continuation),
    ]
}

/// Delivers a byte string in caller-chosen pieces.
struct Pieces {
    data: Vec<u8>,
    cuts: Vec<usize>,
    pos: usize,
}

impl ByteSource for Pieces {
    fn recv(&mut self, buf: &mut [u8]) -> rswire::Result<usize> {
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let step = self.cuts.pop().unwrap_or(usize::MAX).max(1);
        let n = step.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn chunked(body: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    let mut rest = body;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let n = (*sizes.next().unwrap_or(&1)).clamp(1, rest.len());
        out.extend_from_slice(format!("{n:x}\r\n").as_bytes());
        out.extend_from_slice(&rest[..n]);
        out.extend_from_slice(b"\r\n");
        rest = &rest[n..];
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

// =============================================================================
// Length boundaries
// =============================================================================

#[test]
fn test_roundtrip_length_boundaries() {
    for len in [0usize, 1, 125, 126, 65535, 65536, 1_000_000] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mask = [0x11, 0x22, 0x33, 0x44];
        let wire = encode_frame(true, OpCode::Binary, Some(mask), &payload);

        let mut src: &[u8] = &wire;
        let mut header = FrameHeader::read_from(&mut src).unwrap();
        assert!(header.fin, "len {len}");
        assert_eq!(header.opcode, OpCode::Binary);
        assert!(header.masked);
        assert_eq!(header.mask, mask);
        assert_eq!(header.payload_len, len as u64);

        let decoded = header.read_payload(&mut src, &Limits::default()).unwrap();
        assert_eq!(decoded, payload, "len {len}");
        assert!(src.is_empty());
    }
}

proptest! {
    // =========================================================================
    // Property 1: Roundtrip - parse(encode(frame)) == frame (unmasked)
    // =========================================================================
    #[test]
    fn test_roundtrip_unmasked(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1000)
    ) {
        let frame = Frame::new(fin, opcode, payload);
        let wire = frame.encode(None);
        prop_assert_eq!(wire.len(), frame.wire_size(false));

        let (parsed, consumed) = Frame::parse(&wire).unwrap();
        prop_assert_eq!(consumed, wire.len());
        prop_assert_eq!(parsed, frame);
    }

    // =========================================================================
    // Property 2: Roundtrip with masking, decoded through a byte source
    // =========================================================================
    #[test]
    fn test_roundtrip_masked_stream(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..70000),
        mask in any::<[u8; 4]>()
    ) {
        let wire = encode_frame(fin, opcode, Some(mask), &payload);
        let mut src: &[u8] = &wire;
        let mut header = FrameHeader::read_from(&mut src).unwrap();
        prop_assert_eq!(header.fin, fin);
        prop_assert_eq!(header.opcode, opcode);
        prop_assert_eq!(header.mask, mask);
        prop_assert_eq!(header.encoded_len(), wire.len() - payload.len());

        let decoded = header.read_payload(&mut src, &Limits::default()).unwrap();
        prop_assert_eq!(decoded, payload);
    }

    // =========================================================================
    // Property 3: Masking is self-inverse
    // =========================================================================
    #[test]
    fn test_mask_reversible(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(&data, &masked);

        let mut slow = data.clone();
        let mut fast = data;
        apply_mask(&mut slow, mask);
        apply_mask_fast(&mut fast, mask);
        prop_assert_eq!(slow, fast);
    }

    // =========================================================================
    // Property 4: Truncated frames never parse
    // =========================================================================
    #[test]
    fn test_truncated_frame_is_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..300),
        cut in any::<prop::sample::Index>()
    ) {
        let wire = encode_frame(true, OpCode::Text, None, &payload);
        let cut = cut.index(wire.len());
        prop_assert!(Frame::parse(&wire[..cut]).is_err());
    }

    // =========================================================================
    // Property 5: Repeated header names keep append order
    // =========================================================================
    #[test]
    fn test_header_values_keep_order(
        values in prop::collection::vec("[a-z0-9]{1,8}", 1..10),
        other in "[a-z]{1,8}"
    ) {
        let mut table = HeaderTable::new();
        table.append("X-Other", other.as_str());
        for value in &values {
            table.append("Set-Cookie", value.as_str());
        }

        prop_assert!(table.contains("set-cookie"));
        prop_assert!(!table.contains("cookie"));
        prop_assert_eq!(table.get_all("SET-COOKIE"), values.as_slice());
        prop_assert_eq!(table.get("Set-Cookie"), values.first().map(String::as_str));
    }

    // =========================================================================
    // Property 6: Chunked bodies decode identically under any read split
    // =========================================================================
    #[test]
    fn test_chunked_under_arbitrary_splits(
        body in prop::collection::vec(any::<u8>(), 0..2000),
        sizes in prop::collection::vec(1usize..300, 1..8),
        cuts in prop::collection::vec(1usize..64, 0..200)
    ) {
        let source = Pieces { data: chunked(&body, &sizes), cuts, pos: 0 };
        let mut reader = HttpReader::new(source, Limits::default());
        reader.read_head().unwrap();
        prop_assert!(reader.message().is_chunked());

        let decoded = reader.read_to_end().unwrap();
        prop_assert_eq!(decoded, body);
        prop_assert!(reader.message().is_final());
    }

    // =========================================================================
    // Property 7: Content-Length bodies stop exactly at the declared length
    // =========================================================================
    #[test]
    fn test_content_length_stops_at_declared(
        body in prop::collection::vec(any::<u8>(), 0..1000),
        trailing in prop::collection::vec(any::<u8>(), 0..100)
    ) {
        let mut wire = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        wire.extend_from_slice(&body);
        wire.extend_from_slice(&trailing);

        let mut reader = HttpReader::new(&wire[..], Limits::default());
        reader.read_head().unwrap();
        prop_assert_eq!(reader.read_to_end().unwrap(), body);
        prop_assert!(reader.message().is_final());
        prop_assert_eq!(reader.get_ref().len(), trailing.len());
    }
}
