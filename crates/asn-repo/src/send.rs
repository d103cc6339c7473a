//! Replication dispatch: the sender abstraction.

use std::path::Path;

use asn_proto::PubEncr;

/// Where a replica goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every currently connected peer judged a mirror
    Mirrors,
    /// The session logged in under this key, if any
    Key(PubEncr),
}

/// Abstract replication sink.
///
/// The repository calls `send` once per interested party while dispatching a
/// stored object. Implementations must read `src` before returning: some
/// dispatched objects (`asn/mark`, `asn/bridge`) are unlinked as soon as
/// dispatch completes.
pub trait Sender {
    /// Replicate the object file at `src` to `to`.
    ///
    /// Failures are the sink's problem (log and drop); the repository's
    /// store path never fails because a peer is unreachable.
    fn send(&self, to: Recipient, src: &Path);
}

/// Sink that drops everything. Used when replaying local objects with no
/// peers attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSender;

impl Sender for NullSender {
    fn send(&self, _to: Recipient, _src: &Path) {}
}
