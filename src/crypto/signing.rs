//! Ed25519 signing, grounded in the node's identity keypair (see `crate::identity`).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("signature verification failed")]
    VerificationFailed,
}

pub fn sign(key: &SigningKey, preimage: &[u8]) -> [u8; 64] {
    key.sign(preimage).to_bytes()
}

pub fn verify(
    public_key: &VerifyingKey,
    preimage: &[u8],
    signature_bytes: &[u8],
) -> Result<(), SigningError> {
    let sig_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| SigningError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_array);
    public_key
        .verify(preimage, &signature)
        .map_err(|_| SigningError::VerificationFailed)
}

pub fn public_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, SigningError> {
    let arr: [u8; 32] = bytes.try_into().map_err(|_| SigningError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| SigningError::InvalidPublicKey)
}

pub fn public_key_to_hex(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}
