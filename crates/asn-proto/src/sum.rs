//! SHA-512 content sums and their repository path form.
//!
//! Every stored object is named by the SHA-512 of its bytes, rendered as
//! 128 hex digits and split `2/rest`: the first two digits name the top
//! directory, the remainder names the leaf.

use std::{fmt, io, path::PathBuf};

use sha2::{Digest, Sha512};

/// Hex digits taken for the top-level directory name.
pub const TOP_LEN: usize = 2;

/// 64-byte SHA-512 sum of an on-disk object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sum([u8; 64]);

impl Sum {
    /// Wrap raw digest bytes.
    #[must_use]
    pub fn from_bytes(raw: [u8; 64]) -> Self {
        Self(raw)
    }

    /// Finalize a running SHA-512 accumulator into a sum.
    #[must_use]
    pub fn from_digest(h: Sha512) -> Self {
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&h.finalize());
        Self(raw)
    }

    /// Sum of a complete in-memory byte sequence.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut h = Sha512::new();
        h.update(bytes);
        Self::from_digest(h)
    }

    /// Read exactly one sum from a reader. `Ok(None)` on clean EOF.
    ///
    /// Approval and removal payloads are sequences of these.
    pub fn read_from<R: io::Read>(r: &mut R) -> io::Result<Option<Self>> {
        let mut raw = [0u8; 64];
        let mut n = 0;
        while n < raw.len() {
            let i = r.read(&mut raw[n..])?;
            if i == 0 {
                if n == 0 {
                    return Ok(None);
                }
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            n += i;
        }
        Ok(Some(Self(raw)))
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Full 128-digit hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Repository-relative path: `<hex[..2]>/<hex[2..]>`.
    #[must_use]
    pub fn rel_path(&self) -> PathBuf {
        let s = self.to_hex();
        PathBuf::from(&s[..TOP_LEN]).join(&s[TOP_LEN..])
    }
}

impl fmt::Debug for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sum({}..)", &self.to_hex()[..16])
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splits_two_rest() {
        let sum = Sum::of(b"hello");
        let hex = sum.to_hex();
        assert_eq!(hex.len(), 128);

        let p = sum.rel_path();
        let mut parts = p.iter();
        assert_eq!(parts.next().unwrap().to_str().unwrap(), &hex[..2]);
        assert_eq!(parts.next().unwrap().to_str().unwrap(), &hex[2..]);
        assert!(parts.next().is_none());
    }

    #[test]
    fn read_from_drains_sequence() {
        let a = Sum::of(b"a");
        let b = Sum::of(b"b");
        let mut payload = Vec::new();
        payload.extend_from_slice(a.as_bytes());
        payload.extend_from_slice(b.as_bytes());

        let mut r = payload.as_slice();
        assert_eq!(Sum::read_from(&mut r).unwrap(), Some(a));
        assert_eq!(Sum::read_from(&mut r).unwrap(), Some(b));
        assert_eq!(Sum::read_from(&mut r).unwrap(), None);
    }

    #[test]
    fn read_from_rejects_partial() {
        let sum = Sum::of(b"a");
        let mut r = &sum.as_bytes()[..30];
        assert!(Sum::read_from(&mut r).is_err());
    }
}
