//! Local node identity (§3 "NodeIdentity", §2.1 ambient
//! addition): the long-lived Ed25519 signing keypair used as `sender_id` in
//! ledger entries, a companion X25519 identity key used to bootstrap session
//! handshakes, and a persisted creation timestamp. Not the onboarding/backup
//! UX (out of scope) — just the key material C3 and C6 need to operate.
//!
//! Encrypted at rest with AES-256-GCM under an Argon2-derived key, mirroring
//! the source tree's wallet encryption, minus the address/network-type
//! coupling this spec has no use for.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::signing;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file not found")]
    NotFound,
    #[error("failed to read identity file: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed identity file: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("wrong password or corrupted identity file")]
    InvalidPassword,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// On-disk encrypted identity file.
#[derive(Serialize, Deserialize)]
struct EncryptedIdentityFile {
    version: u32,
    salt: String,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Plaintext identity payload, only ever held decrypted in memory.
#[derive(Serialize, Deserialize, Clone)]
struct IdentityData {
    version: u32,
    signing_key_bytes: [u8; 32],
    x25519_secret_bytes: [u8; 32],
    created_at: i64,
}

/// The node's long-term key material. `sender_id`/`receiver_id` throughout
/// the ledger are the hex encoding of `signing_key.verifying_key()`.
pub struct NodeIdentity {
    signing_key: SigningKey,
    x25519_secret: StaticSecret,
    created_at: i64,
}

impl NodeIdentity {
    /// Generates a fresh identity; callers persist it with `save`.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let x25519_secret = StaticSecret::random_from_rng(OsRng);
        Self {
            signing_key,
            x25519_secret,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded public key, used as `sender_id`/`receiver_id` and as the
    /// 32-byte `sender_peer_id` in wire AAD.
    pub fn node_id(&self) -> String {
        signing::public_key_to_hex(&self.verifying_key())
    }

    pub fn node_id_bytes(&self) -> [u8; 32] {
        *self.verifying_key().as_bytes()
    }

    pub fn x25519_public(&self) -> X25519PublicKey {
        X25519PublicKey::from(&self.x25519_secret)
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Loads an identity if `path` exists, otherwise generates and persists
    /// a fresh one. Matches the source tree's `get_or_create_wallet` shape.
    pub fn load_or_create<P: AsRef<Path>>(path: P, password: &str) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path, password)
        } else {
            let identity = Self::generate();
            identity.save(path, password)?;
            Ok(identity)
        }
    }

    pub fn load<P: AsRef<Path>>(path: P, password: &str) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IdentityError::NotFound);
        }

        let contents = fs::read(path)?;
        let file: EncryptedIdentityFile = bincode::deserialize(&contents)?;

        let mut key = derive_key(password, &file.salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
        let nonce = Nonce::from_slice(&file.nonce);
        let plaintext = cipher
            .decrypt(nonce, file.ciphertext.as_ref())
            .map_err(|_| IdentityError::InvalidPassword)?;
        key.zeroize();

        let data: IdentityData = bincode::deserialize(&plaintext)?;
        let signing_key = SigningKey::from_bytes(&data.signing_key_bytes);
        let x25519_secret = StaticSecret::from(data.x25519_secret_bytes);

        Ok(Self {
            signing_key,
            x25519_secret,
            created_at: data.created_at,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P, password: &str) -> Result<(), IdentityError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let salt = SaltString::generate(&mut OsRng);
        let mut key = derive_key(password, salt.as_str())?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;

        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let data = IdentityData {
            version: 1,
            signing_key_bytes: self.signing_key.to_bytes(),
            x25519_secret_bytes: self.x25519_secret.to_bytes(),
            created_at: self.created_at,
        };
        let plaintext = bincode::serialize(&data)?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
        key.zeroize();

        let file = EncryptedIdentityFile {
            version: 1,
            salt: salt.to_string(),
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        };
        let bytes = bincode::serialize(&file)?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

impl Drop for NodeIdentity {
    fn drop(&mut self) {
        // SigningKey and StaticSecret already zeroize their own bytes on drop.
    }
}

fn derive_key(password: &str, salt_str: &str) -> Result<[u8; 32], IdentityError> {
    let argon2 = Argon2::default();
    let salt = SaltString::from_b64(salt_str).map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
    let hash_bytes = hash
        .hash
        .ok_or_else(|| IdentityError::KeyDerivation("no hash output".to_string()))?;
    let mut key = [0u8; 32];
    let slice = hash_bytes.as_bytes();
    key.copy_from_slice(&slice[..32.min(slice.len())]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generated_identity_has_a_valid_node_id() {
        let identity = NodeIdentity::generate();
        assert_eq!(identity.node_id().len(), 64);
    }

    #[test]
    fn save_then_load_recovers_the_same_signing_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let identity = NodeIdentity::generate();
        let node_id = identity.node_id();
        identity.save(&path, "correct horse").unwrap();

        let loaded = NodeIdentity::load(&path, "correct horse").unwrap();
        assert_eq!(loaded.node_id(), node_id);
    }

    #[test]
    fn wrong_password_fails_to_decrypt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let identity = NodeIdentity::generate();
        identity.save(&path, "right password").unwrap();

        let err = NodeIdentity::load(&path, "wrong password").unwrap_err();
        assert!(matches!(err, IdentityError::InvalidPassword));
    }

    #[test]
    fn load_or_create_generates_once_and_reuses_after() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let first = NodeIdentity::load_or_create(&path, "pw").unwrap();
        let second = NodeIdentity::load_or_create(&path, "pw").unwrap();
        assert_eq!(first.node_id(), second.node_id());
    }
}
