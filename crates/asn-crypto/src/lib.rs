//! Authenticated segment encryption for the ASN protocol.
//!
//! One [`CryptoBox`] holds the paired encryption state for one peer: the
//! X25519 shared secret of the pairing, and a rolling nonce per direction.
//! Segments are sealed and opened with XChaCha20-Poly1305; the nonce is
//! implicit (both sides advance in lockstep), so the only wire expansion is
//! the 16-byte tag, [`BOX_OVERHEAD`].

mod error;
mod keypair;
mod seal;

pub use error::BoxError;
pub use keypair::gen_encr_keypair;
pub use seal::{BOX_OVERHEAD, CryptoBox, Role};
