//! The segment box: paired authenticated encryption for one peer.

use asn_proto::{Nonce, PubEncr, SecEncr};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::BoxError;

/// Constant ciphertext expansion per segment (the Poly1305 tag).
pub const BOX_OVERHEAD: usize = 16;

/// Label for deriving the segment key from the X25519 shared secret.
const BOX_KEY_LABEL: &[u8] = b"asn segment box v1";

/// Which side of the pairing this box belongs to.
///
/// The role tags the nonce per direction so the two flows of a full-duplex
/// connection never share a nonce, even at equal sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side that dialed the connection
    Initiator,
    /// The side that accepted it
    Responder,
}

impl Role {
    /// Direction bytes: (our seal flow, the peer's seal flow).
    fn tags(self) -> (u8, u8) {
        match self {
            Self::Initiator => (0x01, 0x02),
            Self::Responder => (0x02, 0x01),
        }
    }
}

/// Paired authenticated-encryption state for one peer.
///
/// Holds the key derived from the pairing's X25519 shared secret plus a
/// rolling nonce per direction. Both sides must seal and open in the same
/// order; a skipped or replayed segment shows up as [`BoxError::Auth`].
///
/// After a login exchange the connection's box is *replaced* by one built
/// over the login-derived keys; the old box is kept alive only by PDUs
/// queued before the swap.
pub struct CryptoBox {
    cipher: XChaCha20Poly1305,
    base: [u8; 24],
    seal_tag: u8,
    open_tag: u8,
    seal_seq: u64,
    open_seq: u64,
}

impl CryptoBox {
    /// Build the box for a pairing.
    ///
    /// Both sides derive the same key from `x25519(our_sec, peer_pub)`; the
    /// `role` keeps their nonce flows disjoint. `base` is the configured
    /// initial nonce.
    #[must_use]
    pub fn new(our_sec: &SecEncr, peer_pub: &PubEncr, base: &Nonce, role: Role) -> Self {
        let shared = StaticSecret::from(*our_sec.as_bytes())
            .diffie_hellman(&PublicKey::from(*peer_pub.as_bytes()));

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut key = [0u8; 32];
        let Ok(()) = hk.expand(BOX_KEY_LABEL, &mut key) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };
        let cipher = XChaCha20Poly1305::new(&key.into());
        key.zeroize();

        let (seal_tag, open_tag) = role.tags();
        Self { cipher, base: *base.as_bytes(), seal_tag, open_tag, seal_seq: 0, open_seq: 0 }
    }

    /// Derive the post-login box from the login-exchange keys.
    ///
    /// Fresh nonce counters over the same base; the pre-login box stays
    /// valid for segments already queued under it.
    #[must_use]
    pub fn login_rekey(&self, our_sec: &SecEncr, peer_pub: &PubEncr) -> Self {
        let role =
            if self.seal_tag == 0x01 { Role::Initiator } else { Role::Responder };
        Self::new(our_sec, peer_pub, &Nonce(self.base), role)
    }

    /// Seal a plaintext chunk, appending tag+ciphertext to `out` and
    /// advancing the outbound nonce.
    pub fn seal(&mut self, plain: &[u8], out: &mut Vec<u8>) -> Result<(), BoxError> {
        let nonce = self.nonce_for(self.seal_tag, self.seal_seq);
        let Ok(ct) = self.cipher.encrypt(XNonce::from_slice(&nonce), plain) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };
        self.seal_seq += 1;
        out.extend_from_slice(&ct);
        Ok(())
    }

    /// Open a sealed segment, appending the plaintext to `out` and advancing
    /// the inbound nonce.
    ///
    /// # Errors
    ///
    /// [`BoxError::Auth`] on tamper, wrong keys, or nonce desync. The nonce
    /// does not advance on failure.
    pub fn open(&mut self, sealed: &[u8], out: &mut Vec<u8>) -> Result<(), BoxError> {
        let nonce = self.nonce_for(self.open_tag, self.open_seq);
        let plain = self
            .cipher
            .decrypt(XNonce::from_slice(&nonce), sealed)
            .map_err(|_| BoxError::Auth)?;
        self.open_seq += 1;
        out.extend_from_slice(&plain);
        Ok(())
    }

    /// Nonce for one flow: base XOR direction tag XOR BE sequence counter.
    fn nonce_for(&self, tag: u8, seq: u64) -> [u8; 24] {
        let mut n = self.base;
        n[0] ^= tag;
        for (b, s) in n[16..24].iter_mut().zip(seq.to_be_bytes()) {
            *b ^= s;
        }
        n
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox")
            .field("seal_seq", &self.seal_seq)
            .field("open_seq", &self.open_seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::keypair::gen_encr_keypair;

    fn pair() -> (CryptoBox, CryptoBox) {
        let mut rng = rand::thread_rng();
        let (pub_a, sec_a) = gen_encr_keypair(&mut rng);
        let (pub_b, sec_b) = gen_encr_keypair(&mut rng);
        let base = Nonce([0x5au8; 24]);
        let a = CryptoBox::new(&sec_a, &pub_b, &base, Role::Initiator);
        let b = CryptoBox::new(&sec_b, &pub_a, &base, Role::Responder);
        (a, b)
    }

    #[test]
    fn seal_open_round_trip() {
        let (mut a, mut b) = pair();

        let mut wire = Vec::new();
        a.seal(b"hello peer", &mut wire).unwrap();
        assert_eq!(wire.len(), 10 + BOX_OVERHEAD);

        let mut plain = Vec::new();
        b.open(&wire, &mut plain).unwrap();
        assert_eq!(plain, b"hello peer");
    }

    #[test]
    fn full_duplex_flows_are_independent() {
        let (mut a, mut b) = pair();

        let mut from_a = Vec::new();
        a.seal(b"a to b", &mut from_a).unwrap();
        let mut from_b = Vec::new();
        b.seal(b"b to a", &mut from_b).unwrap();

        let mut out = Vec::new();
        b.open(&from_a, &mut out).unwrap();
        a.open(&from_b, &mut out).unwrap();
        assert_eq!(out, b"a to bb to a");
    }

    #[test]
    fn tamper_fails_authentication() {
        let (mut a, mut b) = pair();

        let mut wire = Vec::new();
        a.seal(b"payload", &mut wire).unwrap();
        wire[0] ^= 0xff;

        let mut out = Vec::new();
        assert_eq!(b.open(&wire, &mut out), Err(BoxError::Auth));
        assert!(out.is_empty());
    }

    #[test]
    fn skipped_segment_desyncs() {
        let (mut a, mut b) = pair();

        let mut first = Vec::new();
        a.seal(b"one", &mut first).unwrap();
        let mut second = Vec::new();
        a.seal(b"two", &mut second).unwrap();

        // Opening the second segment first fails; the nonce did not advance,
        // so the segments still open in order afterwards.
        let mut out = Vec::new();
        assert_eq!(b.open(&second, &mut out), Err(BoxError::Auth));
        b.open(&first, &mut out).unwrap();
        b.open(&second, &mut out).unwrap();
        assert_eq!(out, b"onetwo");
    }

    #[test]
    fn rekey_produces_incompatible_box() {
        let (mut a, mut b) = pair();

        let mut rng = rand::thread_rng();
        let (eph_pub_a, eph_sec_a) = gen_encr_keypair(&mut rng);
        let (eph_pub_b, eph_sec_b) = gen_encr_keypair(&mut rng);

        let mut a2 = a.login_rekey(&eph_sec_a, &eph_pub_b);
        let mut b2 = b.login_rekey(&eph_sec_b, &eph_pub_a);

        // Post-login boxes talk to each other but not to the old pairing.
        let mut wire = Vec::new();
        a2.seal(b"post-login", &mut wire).unwrap();

        let mut out = Vec::new();
        assert_eq!(b.open(&wire, &mut out), Err(BoxError::Auth));
        b2.open(&wire, &mut out).unwrap();
        assert_eq!(out, b"post-login");

        // And the old pairing still works for in-flight segments.
        let mut old_wire = Vec::new();
        a.seal(b"pre-login ack", &mut old_wire).unwrap();
        let mut old_out = Vec::new();
        b.open(&old_wire, &mut old_out).unwrap();
        assert_eq!(old_out, b"pre-login ack");
    }

    proptest! {
        #[test]
        fn arbitrary_plaintext_round_trips(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            let (mut a, mut b) = pair();
            let mut wire = Vec::new();
            a.seal(&data, &mut wire).unwrap();
            prop_assert_eq!(wire.len(), data.len() + BOX_OVERHEAD);

            let mut out = Vec::new();
            b.open(&wire, &mut out).unwrap();
            prop_assert_eq!(out, data);
        }
    }
}
