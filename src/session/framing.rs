//! AEAD framing (C6): `version | type | nonce | tag | ciphertext`, with the
//! decrypted body carrying `priority | ttl | hop_count | payload_len | payload`.

use crate::crypto::aead::{self, AeadError, CipherKind, NONCE_LEN, TAG_LEN};
use crate::session::session::SessionError;
use crate::wire::{self, FrameHeader, MessageType, FRAME_VERSION, PEER_ID_LEN};

/// Encrypts and frames `payload` for `msg_type`, addressed from
/// `sender_peer_id`. `key`/`cipher_kind` come from the peer's active session.
pub fn encode_frame(
    msg_type: MessageType,
    sender_peer_id: &[u8; PEER_ID_LEN],
    key: &[u8; 32],
    cipher_kind: CipherKind,
    header: &FrameHeader,
    payload: &[u8],
) -> Result<Vec<u8>, SessionError> {
    let body = wire::encode_body(header, payload);
    let nonce = aead::random_nonce();
    let aad = wire::frame_aad(msg_type, sender_peer_id);
    let sealed = aead::seal(cipher_kind, key, &nonce, &aad, &body).map_err(|_: AeadError| SessionError::Aead)?;

    // `seal` returns `ciphertext || tag`; the wire wants `tag | ciphertext`.
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut frame = Vec::with_capacity(2 + NONCE_LEN + TAG_LEN + ciphertext.len());
    frame.push(FRAME_VERSION);
    frame.push(msg_type.to_byte());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(tag);
    frame.extend_from_slice(ciphertext);
    Ok(frame)
}

pub struct DecodedFrame {
    pub msg_type: MessageType,
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Decrypts a frame produced by `encode_frame`. A tag mismatch is tampering,
/// not a transport failure; callers count repeated failures from the same
/// peer toward a `suspicious_peer` behavior event rather than retrying as-is.
pub fn decode_frame(
    frame: &[u8],
    sender_peer_id: &[u8; PEER_ID_LEN],
    key: &[u8; 32],
    cipher_kind: CipherKind,
) -> Result<DecodedFrame, SessionError> {
    if frame.len() < 2 + NONCE_LEN + TAG_LEN {
        return Err(SessionError::Aead);
    }
    if frame[0] != FRAME_VERSION {
        return Err(SessionError::Handshake("unsupported frame version"));
    }
    let msg_type = MessageType::from_byte(frame[1]).map_err(|_| SessionError::Aead)?;
    let nonce: [u8; NONCE_LEN] = frame[2..2 + NONCE_LEN].try_into().unwrap();
    let tag = &frame[2 + NONCE_LEN..2 + NONCE_LEN + TAG_LEN];
    let ciphertext = &frame[2 + NONCE_LEN + TAG_LEN..];

    let mut ciphertext_with_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    ciphertext_with_tag.extend_from_slice(ciphertext);
    ciphertext_with_tag.extend_from_slice(tag);

    let aad = wire::frame_aad(msg_type, sender_peer_id);
    let body = aead::open(cipher_kind, key, &nonce, &aad, &ciphertext_with_tag)
        .map_err(|_: AeadError| SessionError::Aead)?;

    let (header, payload) = wire::decode_body(&body).map_err(|_| SessionError::Aead)?;
    Ok(DecodedFrame {
        msg_type,
        header,
        payload: payload.to_vec(),
    })
}
