//! Error types for wire and disk codecs.

use std::io;

use thiserror::Error;

/// Errors raised while encoding or decoding segment headers.
///
/// Both variants are connection-fatal at the transport: a peer that emits
/// an empty or oversized segment is broken or malicious.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegError {
    /// Segment length field was zero
    #[error("zero-length segment")]
    Empty,

    /// Segment length field exceeds the frame bound
    #[error("segment length {len} exceeds {max}", max = crate::MAX_SEG_SZ)]
    TooLarge {
        /// Claimed ciphertext length
        len: u16,
    },
}

/// Errors raised by PDU reassembly and spill promotion.
#[derive(Error, Debug)]
pub enum PduError {
    /// Spill promotion requested on an already-spilled PDU.
    ///
    /// A PDU has exactly one representation; a second promotion indicates a
    /// reassembler bug and aborts the connection.
    #[error("pdu already spilled to disk")]
    AlreadySpilled,

    /// Underlying file I/O failure
    #[error("pdu i/o: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while reading a blob header.
#[derive(Error, Debug)]
pub enum BlobError {
    /// Leading type-id byte was not a blob id
    #[error("unknown object id {0:#04x}")]
    BadId(u8),

    /// Blob name was not valid UTF-8
    #[error("blob name is not utf-8")]
    Name,

    /// Underlying I/O failure (including truncated headers)
    #[error("blob i/o: {0}")]
    Io(#[from] io::Error),
}
