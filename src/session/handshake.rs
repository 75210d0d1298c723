//! X25519 handshake messages and the initiator/responder roles that produce
//! them (C6). Each side's ephemeral secret is consumed exactly once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::ecdh::EphemeralKeypair;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeInit {
    pub session_id: [u8; 16],
    pub public_key: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResp {
    pub session_id: [u8; 16],
    pub public_key: [u8; 32],
}

/// The side that opens the handshake. Holds the ephemeral secret between
/// sending `HANDSHAKE_INIT` and receiving `HANDSHAKE_RESP`.
pub struct HandshakeInitiator {
    keypair: EphemeralKeypair,
    pub session_id: [u8; 16],
}

impl HandshakeInitiator {
    pub fn start() -> (Self, HandshakeInit) {
        let keypair = EphemeralKeypair::generate();
        let session_id: [u8; 16] = *Uuid::new_v4().as_bytes();
        let init = HandshakeInit {
            session_id,
            public_key: keypair.public_bytes(),
        };
        (Self { keypair, session_id }, init)
    }

    /// Consumes the ephemeral secret to derive the shared secret from the
    /// responder's public key.
    pub fn complete(self, resp: &HandshakeResp) -> [u8; 32] {
        self.keypair.diffie_hellman(&resp.public_key)
    }
}

/// One-shot responder role: generates an ephemeral key, echoes the session
/// id, and derives the shared secret immediately since there is no further
/// round trip on this side.
pub fn respond(init: &HandshakeInit) -> (HandshakeResp, [u8; 32]) {
    let keypair = EphemeralKeypair::generate();
    let resp = HandshakeResp {
        session_id: init.session_id,
        public_key: keypair.public_bytes(),
    };
    let shared = keypair.diffie_hellman(&init.public_key);
    (resp, shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_and_responder_converge_on_the_same_secret() {
        let (initiator, init) = HandshakeInitiator::start();
        let (resp, responder_secret) = respond(&init);
        let initiator_secret = initiator.complete(&resp);
        assert_eq!(initiator_secret, responder_secret);
    }

    #[test]
    fn responder_echoes_the_session_id() {
        let (_, init) = HandshakeInitiator::start();
        let (resp, _) = respond(&init);
        assert_eq!(resp.session_id, init.session_id);
    }
}
