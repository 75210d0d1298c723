//! X25519 key exchange for the session handshake (C6).

use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

/// An ephemeral X25519 keypair for a single handshake. Never reused across
/// sessions: rotation (§4.5) always generates a fresh one.
pub struct EphemeralKeypair {
    secret: Option<EphemeralSecret>,
    pub public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret: Some(secret),
            public,
        }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Consumes the ephemeral secret to derive the shared secret with a peer's
    /// public key. `EphemeralSecret` is single-use by construction; this
    /// mirrors that by taking `self`.
    pub fn diffie_hellman(mut self, peer_public: &[u8; 32]) -> [u8; 32] {
        let peer = PublicKey::from(*peer_public);
        let secret = self.secret.take().expect("diffie_hellman called twice");
        let shared = secret.diffie_hellman(&peer);
        shared.to_bytes()
    }
}

impl Drop for EphemeralKeypair {
    fn drop(&mut self) {
        // EphemeralSecret already zeroizes on drop; this guards the Option itself.
        self.secret = None;
    }
}

/// Zeroizing wrapper for a derived shared secret used directly as an AEAD key.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret(pub [u8; 32]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_secret() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();
        let alice_pub = alice.public_bytes();
        let bob_pub = bob.public_bytes();

        let alice_shared = alice.diffie_hellman(&bob_pub);
        let bob_shared = bob.diffie_hellman(&alice_pub);

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn different_peers_derive_different_secrets() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();
        let eve = EphemeralKeypair::generate();

        let bob_pub = bob.public_bytes();
        let eve_pub = eve.public_bytes();

        let with_bob = EphemeralKeypair::generate().diffie_hellman(&bob_pub);
        let with_eve = EphemeralKeypair::generate().diffie_hellman(&eve_pub);
        assert_ne!(with_bob, with_eve);
        drop(alice);
    }
}
