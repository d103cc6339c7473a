//! Repository error types.

use std::io;

use asn_proto::BlobError;
use thiserror::Error;

/// Errors returned by repository operations.
///
/// `Exist` is recoverable (a duplicate store is a successful no-op for the
/// caller); `Ambiguous` and `NoEnt` surface to the operator; permission
/// failures inside sum-list processing never reach this type, they are
/// diagnosed and skipped.
#[derive(Error, Debug)]
pub enum RepoError {
    /// The content sum is already present; no side effects were performed.
    #[error("object already exists")]
    Exist,

    /// A prefix search matched more than one entry.
    #[error("ambiguous user or sum")]
    Ambiguous,

    /// No user, sum, or file matched.
    #[error("no such user, sum, or file")]
    NoEnt,

    /// The author lacks rights for this name in this owner's namespace.
    #[error("permission denied")]
    Permission,

    /// Malformed object header.
    #[error("object header: {0}")]
    Header(#[from] BlobError),

    /// Underlying filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
