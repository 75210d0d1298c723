//! AEAD sealing for session frames. Generic over the cipher so the same
//! framing code (see `crate::session::framing`) backs either AES-256-GCM or
//! ChaCha20-Poly1305, per the spec's "real AEAD, either is acceptable" mandate.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed: tag mismatch or corrupt frame")]
    DecryptFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CipherKind {
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// Seals `plaintext` under `key` (32 bytes) and `nonce` (12 bytes), authenticating
/// `aad`. Returns `ciphertext || tag` as produced by the underlying AEAD crate;
/// callers that need the wire's `tag | ciphertext` ordering split and reorder it
/// (see `session::framing`).
pub fn seal(
    kind: CipherKind,
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let payload = Payload { msg: plaintext, aad };
    match kind {
        CipherKind::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::EncryptFailed)?;
            cipher
                .encrypt(nonce.into(), payload)
                .map_err(|_| AeadError::EncryptFailed)
        }
        CipherKind::ChaCha20Poly1305 => {
            let cipher =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| AeadError::EncryptFailed)?;
            cipher
                .encrypt(nonce.into(), payload)
                .map_err(|_| AeadError::EncryptFailed)
        }
    }
}

/// Opens `ciphertext_with_tag` (as produced by `seal`) under `key`/`nonce`/`aad`.
/// A tag mismatch is the only failure mode and MUST be treated as tampering by
/// the caller, not a transport retry.
pub fn open(
    kind: CipherKind,
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext_with_tag: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let payload = Payload {
        msg: ciphertext_with_tag,
        aad,
    };
    match kind {
        CipherKind::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::DecryptFailed)?;
            cipher
                .decrypt(nonce.into(), payload)
                .map_err(|_| AeadError::DecryptFailed)
        }
        CipherKind::ChaCha20Poly1305 => {
            let cipher =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| AeadError::DecryptFailed)?;
            cipher
                .decrypt(nonce.into(), payload)
                .map_err(|_| AeadError::DecryptFailed)
        }
    }
}

pub fn random_nonce() -> [u8; NONCE_LEN] {
    rand::random()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(kind: CipherKind) {
        let key = [7u8; 32];
        let nonce = random_nonce();
        let aad = b"header";
        let ciphertext = seal(kind, &key, &nonce, aad, b"hello mesh").unwrap();
        let plaintext = open(kind, &key, &nonce, aad, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello mesh");
    }

    #[test]
    fn aes_gcm_roundtrip() {
        roundtrip(CipherKind::Aes256Gcm);
    }

    #[test]
    fn chacha_roundtrip() {
        roundtrip(CipherKind::ChaCha20Poly1305);
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let key = [1u8; 32];
        let nonce = random_nonce();
        let mut ciphertext = seal(CipherKind::Aes256Gcm, &key, &nonce, b"aad", b"data").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(open(CipherKind::Aes256Gcm, &key, &nonce, b"aad", &ciphertext).is_err());
    }

    #[test]
    fn wrong_aad_is_rejected() {
        let key = [1u8; 32];
        let nonce = random_nonce();
        let ciphertext = seal(CipherKind::Aes256Gcm, &key, &nonce, b"aad-a", b"data").unwrap();
        assert!(open(CipherKind::Aes256Gcm, &key, &nonce, b"aad-b", &ciphertext).is_err());
    }
}
