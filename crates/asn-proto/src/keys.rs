//! Key material newtypes.
//!
//! These are wire/disk representations only: 32-byte public halves, secret
//! halves that wipe themselves on drop, and the 24-byte base nonce. The
//! crypto that consumes them lives in `asn-crypto`.

use std::{fmt, str::FromStr};

use thiserror::Error;
use zeroize::Zeroize;

/// Errors parsing hex-encoded key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Input was not valid hex
    #[error("invalid hex")]
    Hex,

    /// Decoded byte count did not match the key size
    #[error("expected {expected} bytes, got {got}")]
    Length {
        /// Required byte count
        expected: usize,
        /// Decoded byte count
        got: usize,
    },
}

fn decode_exact<const N: usize>(s: &str) -> Result<[u8; N], KeyError> {
    let raw = hex::decode(s).map_err(|_| KeyError::Hex)?;
    let got = raw.len();
    <[u8; N]>::try_from(raw).map_err(|_| KeyError::Length { expected: N, got })
}

/// Public encryption key; also a user's identity in the repository.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubEncr(pub [u8; 32]);

impl PubEncr {
    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full 64-digit hex form (the user's directory name, split 2/rest).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// All-zero key; never a valid identity.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for PubEncr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", &hex::encode(self.0)[..8])
    }
}

impl FromStr for PubEncr {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        decode_exact(s).map(Self)
    }
}

/// Secret encryption key. Wiped on drop.
#[derive(Clone)]
pub struct SecEncr([u8; 32]);

impl SecEncr {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn from_bytes(raw: [u8; 32]) -> Self {
        Self(raw)
    }

    /// Raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecEncr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecEncr(..)")
    }
}

impl FromStr for SecEncr {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        decode_exact(s).map(Self)
    }
}

impl Drop for SecEncr {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Public authentication (signing) key, carried in `asn/auth` blobs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubAuth(pub [u8; 32]);

impl PubAuth {
    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PubAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", &hex::encode(self.0)[..8])
    }
}

impl FromStr for PubAuth {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        decode_exact(s).map(Self)
    }
}

/// Secret authentication key (64 bytes). Wiped on drop.
#[derive(Clone)]
pub struct SecAuth([u8; 64]);

impl SecAuth {
    /// Raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for SecAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecAuth(..)")
    }
}

impl FromStr for SecAuth {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        decode_exact(s).map(Self)
    }
}

impl Drop for SecAuth {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// 24-byte base nonce shared through configuration.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 24]);

impl Nonce {
    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 24] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({}..)", &hex::encode(self.0)[..8])
    }
}

impl FromStr for Nonce {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, KeyError> {
        decode_exact(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_encr_hex_round_trip() {
        let hex = "5fb2d5d9552c47f02d4cfc1f3938abd4c5f685b050501e53f6bf545c05982e33";
        let k: PubEncr = hex.parse().unwrap();
        assert_eq!(k.to_hex(), hex);
    }

    #[test]
    fn sec_auth_is_64_bytes() {
        let hex = "60eabf950dc926735d086f419b2571de6e95c4e1d1efe179590b1acc8ffee39c\
                   9d30799789fb96a2d71855168d8573d2ce6f367e6a0ef7da7bcee72ab31dcc13";
        let k: SecAuth = hex.parse().unwrap();
        assert_eq!(k.as_bytes().len(), 64);
    }

    #[test]
    fn reject_wrong_length() {
        let err = "aabb".parse::<PubEncr>().unwrap_err();
        assert_eq!(err, KeyError::Length { expected: 32, got: 2 });
    }

    #[test]
    fn reject_bad_hex() {
        let err = "zz".repeat(32).parse::<PubEncr>().unwrap_err();
        assert_eq!(err, KeyError::Hex);
    }

    #[test]
    fn nonce_parses_from_config_form() {
        let n: Nonce = "a7967df6f832bbdfc30c301ff22f3929cd4b900610541d39".parse().unwrap();
        assert_eq!(n.as_bytes()[0], 0xa7);
    }
}
