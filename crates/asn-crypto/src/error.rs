//! Error types for the segment box.

use thiserror::Error;

/// Errors raised by [`crate::CryptoBox`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoxError {
    /// Tag verification failed: tampered ciphertext, wrong keys, or a
    /// desynchronized nonce. Fatal to the connection.
    #[error("segment authentication failed")]
    Auth,
}
