//! Session state and the PFS rotation policy (C6): a session's shared secret
//! expires on time, volume, or an explicit event, whichever comes first.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::aead::CipherKind;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session for peer {0}")]
    NoSession(String),
    #[error("AEAD seal or open failed")]
    Aead,
    #[error("handshake failed: {0}")]
    Handshake(&'static str),
}

impl SessionError {
    /// Handshake and AEAD failures trigger rotation and a behavior event but
    /// are always retried with a fresh handshake; never fatal.
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

pub struct Session {
    pub peer_id: String,
    shared_secret: [u8; 32],
    pub cipher_kind: CipherKind,
    created_at: Instant,
    frames_sent: u64,
}

impl Session {
    pub fn new(peer_id: String, shared_secret: [u8; 32], cipher_kind: CipherKind) -> Self {
        Self {
            peer_id,
            shared_secret,
            cipher_kind,
            created_at: Instant::now(),
            frames_sent: 0,
        }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.shared_secret
    }

    pub fn record_frame_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// True once elapsed wall time or frame volume crosses either
    /// configured threshold. An explicit event-triggered rotation bypasses
    /// this check entirely and is requested directly by the caller.
    pub fn needs_rotation(&self, time_rotation: Duration, volume_rotation: u64) -> bool {
        self.created_at.elapsed() >= time_rotation || self.frames_sent >= volume_rotation
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared_secret.zeroize();
    }
}

/// Per-peer session state, keyed by peer id. Sessions are exclusively owned
/// here; rotation atomically swaps the old session for a new one.
pub struct SessionTable {
    sessions: DashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.peer_id.clone(), session);
    }

    /// Atomically replaces any existing session for the peer, zeroing the
    /// old shared secret on drop.
    pub fn rotate(&self, session: Session) {
        self.insert(session);
    }

    pub fn remove(&self, peer_id: &str) {
        self.sessions.remove(peer_id);
    }

    pub fn record_frame_sent(&self, peer_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(peer_id) {
            session.record_frame_sent();
        }
    }

    pub fn needs_rotation(&self, peer_id: &str, time_rotation: Duration, volume_rotation: u64) -> bool {
        self.sessions
            .get(peer_id)
            .map(|s| s.needs_rotation(time_rotation, volume_rotation))
            .unwrap_or(true)
    }

    pub fn key_for(&self, peer_id: &str) -> Option<[u8; 32]> {
        self.sessions.get(peer_id).map(|s| *s.key())
    }

    pub fn cipher_for(&self, peer_id: &str) -> Option<CipherKind> {
        self.sessions.get(peer_id).map(|s| s.cipher_kind)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_rotation_triggers_once_threshold_is_crossed() {
        let mut session = Session::new("peer".into(), [0u8; 32], CipherKind::Aes256Gcm);
        assert!(!session.needs_rotation(Duration::from_secs(3600), 100));
        for _ in 0..100 {
            session.record_frame_sent();
        }
        assert!(session.needs_rotation(Duration::from_secs(3600), 100));
    }

    #[test]
    fn rotate_replaces_session_for_same_peer() {
        let table = SessionTable::new();
        table.insert(Session::new("peer".into(), [1u8; 32], CipherKind::Aes256Gcm));
        assert_eq!(table.key_for("peer"), Some([1u8; 32]));

        table.rotate(Session::new("peer".into(), [2u8; 32], CipherKind::Aes256Gcm));
        assert_eq!(table.key_for("peer"), Some([2u8; 32]));
    }
}
