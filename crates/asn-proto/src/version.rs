//! Protocol version byte with down-negotiation.

use std::{fmt, io};

/// Single-byte protocol version.
///
/// The effective version of a connection is `min(local, peer)`: each
/// announcement from the peer may lower the version, never raise it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u8);

impl Version {
    /// Newest version this implementation speaks.
    pub const LATEST: Self = Self(1);

    /// Lower self to the peer's announced version if the peer is older.
    ///
    /// Once lowered, a later announcement of a newer version has no effect.
    pub fn step_down(&mut self, peer: Self) {
        if peer < *self {
            *self = peer;
        }
    }

    /// Write the version byte.
    pub fn write_to<W: io::Write>(self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.0])
    }

    /// Read a version byte.
    pub fn read_from<R: io::Read>(r: &mut R) -> io::Result<Self> {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        Ok(Self(b[0]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
