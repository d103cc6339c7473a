//! Content-addressed object repository for ASN nodes.
//!
//! Every stored object is named by the SHA-512 of its bytes, split
//! `2/rest` into a top directory and leaf file. Objects carrying a user's
//! reserved names (`asn/mark`, `asn/editors`, ...) update that user's cache
//! and are hard-linked into the user's subtree; message-class objects fan
//! out to owner, author, and subscribers by hard link, with one replica
//! sent per interested key through a caller-supplied [`Sender`].
//!
//! The repository holds no sender and knows no peer identities: replication
//! targets are 32-byte keys or the [`Recipient::Mirrors`] sentinel, resolved
//! by the node that owns the connections.

mod error;
mod repos;
mod send;
mod tmp;
mod user;
mod users;

pub use send::NullSender;

pub use error::RepoError;
pub use repos::{Repos, ServiceKeys, is_hex};
pub use send::{Recipient, Sender};
pub use tmp::TmpStore;
pub use user::UserCache;
