//! Wire and on-disk data types for the ASN protocol.
//!
//! This crate holds pure data: no sockets, no crypto, no repository logic.
//!
//! - [`Version`]: single-byte protocol version with down-negotiation
//! - [`SegHeader`]: 16-bit big-endian segment header with MORE flag
//! - [`Pdu`]: a reassembled protocol data unit, in memory or spilled to disk
//! - [`Blob`]: typed object header (owner, author, random, time, name)
//! - [`Sum`]: SHA-512 content sum and its `2/rest` repository path form
//! - key newtypes: [`PubEncr`], [`SecEncr`], [`PubAuth`], [`SecAuth`],
//!   [`Nonce`]

mod blob;
mod errors;
mod keys;
mod pdu;
mod seg;
mod sum;
mod version;

pub use blob::{
    ASN_APPROVALS, ASN_AUTH, ASN_AUTHOR, ASN_BRIDGE, ASN_EDITORS, ASN_INVITES, ASN_MARK,
    ASN_MESSAGES, ASN_MODERATORS, ASN_REMOVALS, ASN_SUBSCRIBERS, BLOB_ID, BLOB_NAME_OFF, Blob,
};
pub use errors::{BlobError, PduError, SegError};
pub use keys::{KeyError, Nonce, PubAuth, PubEncr, SecAuth, SecEncr};
pub use pdu::Pdu;
pub use seg::{MAX_SEG_SZ, MORE_FLAG, SEG_HDR_LEN, SegHeader, max_chunk, segment_count};
pub use sum::{Sum, TOP_LEN};
pub use version::Version;
