//! Segment framing: a 16-bit big-endian length prefix with a MORE flag.
//!
//! Layout on the wire:
//!
//! ```text
//! [ 16-bit BE: (MORE << 15) | len(ciphertext) ][ ciphertext ]
//! ```
//!
//! MORE = 1 means another segment of the same PDU follows. The low 15 bits
//! carry the ciphertext length `N`, `1 <= N <= MAX_SEG_SZ`.

use bytes::BufMut;

use crate::errors::SegError;

/// Maximum ciphertext bytes in one segment.
pub const MAX_SEG_SZ: usize = 4096;

/// High bit of the length field: more segments of this PDU follow.
pub const MORE_FLAG: u16 = 1 << 15;

/// Size of the segment header on the wire.
pub const SEG_HDR_LEN: usize = 2;

/// Decoded segment header.
///
/// # Invariants
///
/// `1 <= len <= MAX_SEG_SZ`, enforced by [`SegHeader::decode`] and
/// [`SegHeader::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegHeader {
    /// Another segment of the same PDU follows
    pub more: bool,
    /// Ciphertext length of this segment
    pub len: u16,
}

impl SegHeader {
    /// Build a header, validating the length bound.
    pub fn new(more: bool, len: usize) -> Result<Self, SegError> {
        if len == 0 {
            return Err(SegError::Empty);
        }
        if len > MAX_SEG_SZ {
            return Err(SegError::TooLarge { len: len as u16 });
        }
        Ok(Self { more, len: len as u16 })
    }

    /// Append the 2-byte header to `dst`.
    pub fn put(self, dst: &mut impl BufMut) {
        let mut l = self.len;
        if self.more {
            l |= MORE_FLAG;
        }
        dst.put_u16(l);
    }

    /// Decode a header from its 2 wire bytes.
    ///
    /// # Errors
    ///
    /// - [`SegError::Empty`] if the length field is zero
    /// - [`SegError::TooLarge`] if the length field exceeds [`MAX_SEG_SZ`]
    pub fn decode(raw: [u8; SEG_HDR_LEN]) -> Result<Self, SegError> {
        let l = u16::from_be_bytes(raw);
        let len = l & !MORE_FLAG;
        if len == 0 {
            return Err(SegError::Empty);
        }
        if len as usize > MAX_SEG_SZ {
            return Err(SegError::TooLarge { len });
        }
        Ok(Self { more: l & MORE_FLAG != 0, len })
    }
}

/// Largest plaintext chunk a single segment can carry, given the constant
/// ciphertext expansion of the box.
pub fn max_chunk(overhead: usize) -> usize {
    MAX_SEG_SZ - overhead
}

/// Number of segments a PDU of `pdu_len` plaintext bytes occupies on the
/// wire.
pub fn segment_count(pdu_len: usize, overhead: usize) -> usize {
    pdu_len.div_ceil(max_chunk(overhead))
}
