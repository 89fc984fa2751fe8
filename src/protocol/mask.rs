//! Payload masking.
//!
//! Byte `i` of a masked payload is `data[i] XOR mask[i % 4]`. Masking is its own
//! inverse.

use crate::error::{Error, Result};

/// Byte-by-byte XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// XOR masking four bytes at a time.
///
/// Produces the same output as [`apply_mask`].
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_word = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    for (byte, m) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= m;
    }
}

/// Fresh masking key from the OS random source.
///
/// # Errors
///
/// Returns [`Error::Transport`] if the random source is unavailable.
pub fn random_mask() -> Result<[u8; 4]> {
    let mut mask = [0u8; 4];
    getrandom::getrandom(&mut mask)
        .map_err(|e| Error::Transport(format!("random source unavailable: {e}")))?;
    Ok(mask)
}
