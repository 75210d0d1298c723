//! C6: Session Layer — ECDH handshake, PFS rotation, and AEAD framing.

pub mod framing;
pub mod handshake;
pub mod link;
pub mod session;
pub mod transport;
