//! Binds the Session Layer (encryption, AAD, rotation) and the Link Registry
//! (per-peer outbound queues) into the `LinkTransport` the Mesh Dispatcher
//! drives. This is the only place C6 and C7 touch each other directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::crypto::aead::CipherKind;
use crate::mesh::dispatcher::{DispatchError, LinkTransport};
use crate::mesh::message::MeshMessage;
use crate::mesh::obfuscator::Obfuscator;
use crate::session::link::LinkRegistry;
use crate::session::session::SessionTable;
use crate::session::{framing, handshake};
use crate::wire::{FrameHeader, MessageType, Priority};

pub struct SessionLinkTransport {
    local_node_id: [u8; 32],
    sessions: Arc<SessionTable>,
    links: Arc<LinkRegistry>,
    default_cipher: CipherKind,
    obfuscator: Arc<Obfuscator>,
}

impl SessionLinkTransport {
    pub fn new(
        local_node_id: [u8; 32],
        sessions: Arc<SessionTable>,
        links: Arc<LinkRegistry>,
        default_cipher: CipherKind,
        obfuscator: Arc<Obfuscator>,
    ) -> Self {
        Self {
            local_node_id,
            sessions,
            links,
            default_cipher,
            obfuscator,
        }
    }

    fn key_and_cipher(&self, peer_id: &str) -> Result<([u8; 32], CipherKind), DispatchError> {
        let key = self
            .sessions
            .key_for(peer_id)
            .ok_or_else(|| DispatchError::NoRoute(peer_id.to_string()))?;
        let cipher = self.sessions.cipher_for(peer_id).unwrap_or(self.default_cipher);
        Ok((key, cipher))
    }

    async fn transmit(
        &self,
        peer_id: &str,
        msg_type: MessageType,
        header: &FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), DispatchError> {
        let (key, cipher) = self.key_and_cipher(peer_id)?;
        let padded = self.obfuscator.pad(payload);
        let frame = framing::encode_frame(msg_type, &self.local_node_id, &key, cipher, header, &padded).map_err(|e| {
            DispatchError::Transport {
                peer_id: peer_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some(delay_ms) = self.obfuscator.jitter_delay_ms() {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.sessions.record_frame_sent(peer_id);
        self.links.send(peer_id, frame).await.map_err(|e| DispatchError::Transport {
            peer_id: peer_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Sends a decoy frame to `peer_id`, indistinguishable in size from a
    /// real padded frame, to mask real traffic's idle/burst pattern. Carries
    /// no mesh semantics; a receiver recognizes `MessageType::MeshDecoy` and
    /// drops it without routing.
    pub async fn send_decoy(&self, peer_id: &str) -> Result<(), DispatchError> {
        let header = FrameHeader {
            priority: Priority::Bulk,
            ttl: 0,
            hop_count: 0,
        };
        self.transmit(peer_id, MessageType::MeshDecoy, &header, self.obfuscator.decoy_frame())
            .await
    }
}

#[async_trait]
impl LinkTransport for SessionLinkTransport {
    async fn send(&self, peer_id: &str, message: &MeshMessage) -> Result<(), DispatchError> {
        let payload = bincode::serialize(message).map_err(|e| DispatchError::Transport {
            peer_id: peer_id.to_string(),
            reason: e.to_string(),
        })?;
        let header = FrameHeader {
            priority: message.priority,
            ttl: message.ttl,
            hop_count: message.hop_count,
        };
        self.transmit(peer_id, MessageType::MeshText, &header, payload).await
    }
}

/// Runs the initiator side of a handshake against the peer identified by
/// `peer_id`'s registered link, installing the resulting session. Exposed
/// for the node orchestrator to call once per newly discovered peer.
pub async fn handshake_and_install(
    sessions: &SessionTable,
    peer_id: &str,
    responder_resp: handshake::HandshakeResp,
    initiator: handshake::HandshakeInitiator,
    cipher: CipherKind,
) {
    let shared = initiator.complete(&responder_resp);
    sessions.rotate(crate::session::session::Session::new(peer_id.to_string(), shared, cipher));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObfuscatorConfig;

    fn disabled_obfuscator() -> Arc<Obfuscator> {
        Arc::new(Obfuscator::new(ObfuscatorConfig {
            padding_enabled: false,
            padding_buckets: vec![256],
            jitter_enabled: false,
            max_jitter_ms: 0,
            decoy_enabled: false,
            decoy_rate: 0.0,
        }))
    }

    #[tokio::test]
    async fn send_fails_with_no_route_when_no_session_exists() {
        let sessions = Arc::new(SessionTable::new());
        let links = Arc::new(LinkRegistry::new());
        let transport = SessionLinkTransport::new([0u8; 32], sessions, links, CipherKind::Aes256Gcm, disabled_obfuscator());

        let msg = MeshMessage::new_broadcast("s".into(), Priority::Normal, 6, vec![1]);
        let err = transport.send("peer-a", &msg).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoRoute(_)));
    }

    #[tokio::test]
    async fn send_delivers_an_encrypted_frame_to_the_registered_link() {
        let sessions = Arc::new(SessionTable::new());
        let links = Arc::new(LinkRegistry::new());
        sessions.insert(crate::session::session::Session::new(
            "peer-a".to_string(),
            [7u8; 32],
            CipherKind::Aes256Gcm,
        ));
        let mut rx = links.register("peer-a", 4);

        let transport = SessionLinkTransport::new([1u8; 32], sessions, links, CipherKind::Aes256Gcm, disabled_obfuscator());
        let msg = MeshMessage::new_broadcast("s".into(), Priority::Critical, 6, vec![9, 9, 9]);
        transport.send("peer-a", &msg).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(!frame.is_empty());
    }

    #[tokio::test]
    async fn send_pads_the_frame_up_to_the_smallest_fitting_bucket() {
        let sessions = Arc::new(SessionTable::new());
        let links = Arc::new(LinkRegistry::new());
        sessions.insert(crate::session::session::Session::new(
            "peer-a".to_string(),
            [7u8; 32],
            CipherKind::Aes256Gcm,
        ));
        let mut rx = links.register("peer-a", 4);

        let obfuscator = Arc::new(Obfuscator::new(ObfuscatorConfig {
            padding_enabled: true,
            padding_buckets: vec![256, 512],
            jitter_enabled: false,
            max_jitter_ms: 0,
            decoy_enabled: false,
            decoy_rate: 0.0,
        }));
        let transport = SessionLinkTransport::new([1u8; 32], sessions.clone(), links.clone(), CipherKind::Aes256Gcm, obfuscator);
        let msg = MeshMessage::new_broadcast("s".into(), Priority::Normal, 6, vec![9, 9, 9]);
        transport.send("peer-a", &msg).await.unwrap();
        let padded_frame = rx.recv().await.unwrap();

        let unpadded_transport =
            SessionLinkTransport::new([1u8; 32], sessions, links, CipherKind::Aes256Gcm, disabled_obfuscator());
        unpadded_transport.send("peer-a", &msg).await.unwrap();
        let unpadded_frame = rx.recv().await.unwrap();

        assert!(padded_frame.len() > unpadded_frame.len());
    }

    #[tokio::test]
    async fn send_decoy_delivers_a_frame_tagged_as_decoy() {
        let sessions = Arc::new(SessionTable::new());
        let links = Arc::new(LinkRegistry::new());
        sessions.insert(crate::session::session::Session::new(
            "peer-a".to_string(),
            [7u8; 32],
            CipherKind::Aes256Gcm,
        ));
        let mut rx = links.register("peer-a", 4);

        let obfuscator = Arc::new(Obfuscator::new(ObfuscatorConfig {
            padding_enabled: false,
            padding_buckets: vec![256],
            jitter_enabled: false,
            max_jitter_ms: 0,
            decoy_enabled: true,
            decoy_rate: 1.0,
        }));
        let transport = SessionLinkTransport::new([1u8; 32], sessions, links, CipherKind::Aes256Gcm, obfuscator);
        transport.send_decoy("peer-a").await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame[1], MessageType::MeshDecoy.to_byte());
    }
}
