//! Typed object headers and their fixed serialization.
//!
//! Every stored object is `[version][type id][blob header][payload]`. The
//! header layout is fixed:
//!
//! ```text
//! owner   32 bytes   public encryption key
//! author  32 bytes   public encryption key
//! random   8 bytes   anti-deduplication salt
//! time     8 bytes   big-endian unix nanoseconds (UTC)
//! name     1 + n     length-prefixed UTF-8 path
//! payload  to EOF
//! ```

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{PubEncr, Sum, Version, errors::BlobError};

/// Type-id byte of a blob object.
pub const BLOB_ID: u8 = 0x01;

/// Byte offset of the name length prefix within an object file:
/// version (1) + id (1) + owner (32) + author (32) + random (8) + time (8).
pub const BLOB_NAME_OFF: u64 = 82;

/// Last-known location/status for a user.
pub const ASN_MARK: &str = "asn/mark";
/// User's signing public key.
pub const ASN_AUTH: &str = "asn/auth";
/// User's encryption public key (authorization root).
pub const ASN_AUTHOR: &str = "asn/author";
/// Keys permitted to edit/remove on the owner's behalf.
pub const ASN_EDITORS: &str = "asn/editors";
/// Keys whose approval is required for the owner's messages.
pub const ASN_MODERATORS: &str = "asn/moderators";
/// Keys to fan the owner's messages out to.
pub const ASN_SUBSCRIBERS: &str = "asn/subscribers";
/// Keys permitted to open a bridge to the owner.
pub const ASN_INVITES: &str = "asn/invites";
/// Message namespace.
pub const ASN_MESSAGES: &str = "asn/messages";
/// Transient bridge objects; never retained on disk.
pub const ASN_BRIDGE: &str = "asn/bridge";
/// List of sums to publish on the owner's behalf.
pub const ASN_APPROVALS: &str = "asn/approvals";
/// List of sums to retract.
pub const ASN_REMOVALS: &str = "asn/removals";

/// Typed object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// Key of the user whose namespace this object belongs to
    pub owner: PubEncr,
    /// Key of the user who wrote it
    pub author: PubEncr,
    /// Anti-deduplication salt
    pub random: [u8; 8],
    /// Big-endian unix nanoseconds
    pub time_ns: u64,
    /// Hierarchical UTF-8 name; reserved names carry typed semantics
    pub name: String,
}

impl Blob {
    /// Build a header stamped with the current time.
    pub fn new(owner: PubEncr, author: PubEncr, name: impl Into<String>, random: [u8; 8]) -> Self {
        let time_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Self { owner, author, random, time_ns, name: name.into() }
    }

    /// Whether `name` addresses the message namespace.
    ///
    /// An empty name, `asn/messages`, and `asn/messages/` are all
    /// message-class.
    #[must_use]
    pub fn is_message_name(name: &str) -> bool {
        name.is_empty() || name == ASN_MESSAGES || name == "asn/messages/"
    }

    /// Link filename for this blob inside a user subtree.
    ///
    /// Derived from the sum so that two authors publishing the same logical
    /// name produce distinct links (the `random` salt guarantees distinct
    /// sums).
    #[must_use]
    pub fn link_name(&self, sum: &Sum) -> String {
        sum.to_hex()[..32].to_owned()
    }

    /// Serialize the header (owner through name); payload follows separately.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.owner.as_bytes())?;
        w.write_all(self.author.as_bytes())?;
        w.write_all(&self.random)?;
        w.write_all(&self.time_ns.to_be_bytes())?;
        let name = self.name.as_bytes();
        debug_assert!(name.len() <= u8::MAX as usize);
        w.write_all(&[name.len() as u8])?;
        w.write_all(name)
    }

    /// Read a header (owner through name).
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, BlobError> {
        let mut owner = [0u8; 32];
        r.read_exact(&mut owner)?;
        let mut author = [0u8; 32];
        r.read_exact(&mut author)?;
        let mut random = [0u8; 8];
        r.read_exact(&mut random)?;
        let mut time = [0u8; 8];
        r.read_exact(&mut time)?;
        let mut name_len = [0u8; 1];
        r.read_exact(&mut name_len)?;
        let mut name = vec![0u8; name_len[0] as usize];
        r.read_exact(&mut name)?;
        Ok(Self {
            owner: PubEncr(owner),
            author: PubEncr(author),
            random,
            time_ns: u64::from_be_bytes(time),
            name: String::from_utf8(name).map_err(|_| BlobError::Name)?,
        })
    }

    /// Canonical reader: consume `{version, type id, header}` from the head
    /// of an object stream, leaving the reader at the payload.
    pub fn read_with_preamble<R: Read>(r: &mut R) -> Result<(Version, Self), BlobError> {
        let v = Version::read_from(r)?;
        let mut id = [0u8; 1];
        r.read_exact(&mut id)?;
        if id[0] != BLOB_ID {
            return Err(BlobError::BadId(id[0]));
        }
        let blob = Self::read_from(r)?;
        Ok((v, blob))
    }

    /// Write the full preamble `{version, type id, header}`.
    pub fn write_with_preamble<W: Write>(&self, v: Version, w: &mut W) -> io::Result<()> {
        v.write_to(w)?;
        w.write_all(&[BLOB_ID])?;
        self.write_to(w)
    }

    /// Byte offset of the payload within an object file.
    #[must_use]
    pub fn payload_off(&self) -> u64 {
        BLOB_NAME_OFF + 1 + self.name.len() as u64
    }

    /// Read just the blob time from an object file.
    ///
    /// Used to order same-name replacements without trusting file mtimes.
    pub fn time_of(path: &Path) -> Result<u64, BlobError> {
        let mut f = File::open(path)?;
        f.seek(SeekFrom::Start(2 + 32 + 32 + 8))?;
        let mut time = [0u8; 8];
        f.read_exact(&mut time)?;
        Ok(u64::from_be_bytes(time))
    }
}
