//! C1: Crypto Primitives — signing (Ed25519), AEAD (AES-256-GCM / ChaCha20-Poly1305),
//! ECDH (X25519), hashing (SHA-256), and proof-of-work verification.

pub mod aead;
pub mod ecdh;
pub mod hash;
pub mod pow;
pub mod signing;
