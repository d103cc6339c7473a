//! Node error types.

use std::io;

use asn_crypto::BoxError;
use asn_proto::{PduError, SegError};
use asn_repo::RepoError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors fatal to one transport.
///
/// Any of these drives the transport to its terminal `Closed` state; the
/// error surfaces exactly once, as the closure of the inbound PDU queue.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Queue operation on a closed transport
    #[error("transport closed")]
    Closed,

    /// Peer hung up (or a reset preempted the pump)
    #[error("end of stream")]
    Eof,

    /// Segment framing violation
    #[error("frame: {0}")]
    Frame(#[from] SegError),

    /// Segment failed authentication
    #[error("crypto: {0}")]
    Crypto(#[from] BoxError),

    /// PDU reassembly failure
    #[error("pdu: {0}")]
    Pdu(#[from] PduError),

    /// Stream I/O failure (timeouts are retried, never surfaced here)
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    /// Transport built without a box
    #[error("transport has no box")]
    NoBox,
}

/// Top-level node errors.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Configuration loading or validation failure
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Repository failure
    #[error("repository: {0}")]
    Repo(#[from] RepoError),

    /// Malformed handshake PDU
    #[error("handshake: {0}")]
    Handshake(&'static str),

    /// Other I/O failure (bind, accept)
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}
