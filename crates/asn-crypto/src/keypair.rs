//! Encryption keypair generation.

use asn_proto::{PubEncr, SecEncr};
use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

/// Generate a fresh X25519 encryption keypair.
///
/// Used for identity keys at provisioning time and for the ephemeral pair
/// of a login exchange.
pub fn gen_encr_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (PubEncr, SecEncr) {
    let sec = StaticSecret::random_from_rng(rng);
    let public = PublicKey::from(&sec);
    (PubEncr(public.to_bytes()), SecEncr::from_bytes(sec.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypairs_are_distinct() {
        let mut rng = rand::thread_rng();
        let (pub_a, _) = gen_encr_keypair(&mut rng);
        let (pub_b, _) = gen_encr_keypair(&mut rng);
        assert_ne!(pub_a, pub_b);
    }

    #[test]
    fn public_matches_secret() {
        let mut rng = rand::thread_rng();
        let (public, sec) = gen_encr_keypair(&mut rng);
        let derived = PublicKey::from(&StaticSecret::from(*sec.as_bytes()));
        assert_eq!(public.as_bytes(), &derived.to_bytes());
    }
}
