//! Wire framing primitives shared by the Session Layer (C6) and Mesh
//! Dispatcher (C7): the closed message-type tag set (§6) and the
//! little-endian frame-body header layout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FRAME_VERSION: u8 = 1;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const PEER_ID_LEN: usize = 32;
/// `priority(2) | ttl(2) | hop_count(2) | payload_len(4)`
const BODY_HEADER_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame shorter than its fixed header")]
    Truncated,
    #[error("unknown message type byte {0:#x}")]
    UnknownMessageType(u8),
    #[error("unsupported frame version {0}, expected {FRAME_VERSION}")]
    UnsupportedVersion(u8),
}

/// Closed set of wire message tags. Decoding a frame produces exactly one of
/// these variants; there are no dynamic or duck-typed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    HandshakeInit,
    HandshakeResp,
    LedgerEntry,
    SyncRequest,
    SyncResponse,
    MeshText,
    MeshAck,
    MeshDecoy,
}

impl MessageType {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::HandshakeInit => 0x01,
            MessageType::HandshakeResp => 0x02,
            MessageType::LedgerEntry => 0x10,
            MessageType::SyncRequest => 0x11,
            MessageType::SyncResponse => 0x12,
            MessageType::MeshText => 0x20,
            MessageType::MeshAck => 0x21,
            MessageType::MeshDecoy => 0x2F,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, WireError> {
        Ok(match byte {
            0x01 => MessageType::HandshakeInit,
            0x02 => MessageType::HandshakeResp,
            0x10 => MessageType::LedgerEntry,
            0x11 => MessageType::SyncRequest,
            0x12 => MessageType::SyncResponse,
            0x20 => MessageType::MeshText,
            0x21 => MessageType::MeshAck,
            0x2F => MessageType::MeshDecoy,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}

/// Strict dispatch priority. Declaration order is significance order:
/// `Critical` drains before `RealTime` before `Normal` before `Bulk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    RealTime,
    Normal,
    Bulk,
}

impl Priority {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Priority::Critical,
            1 => Priority::RealTime,
            2 => Priority::Normal,
            _ => Priority::Bulk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub priority: Priority,
    pub ttl: u16,
    pub hop_count: u16,
}

/// Encodes the decrypted frame body: `priority | ttl | hop_count | payload_len | payload`.
pub fn encode_body(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BODY_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.priority.to_u16().to_le_bytes());
    out.extend_from_slice(&header.ttl.to_le_bytes());
    out.extend_from_slice(&header.hop_count.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn decode_body(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), WireError> {
    if bytes.len() < BODY_HEADER_LEN {
        return Err(WireError::Truncated);
    }
    let priority = Priority::from_u16(u16::from_le_bytes(bytes[0..2].try_into().unwrap()));
    let ttl = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
    let hop_count = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    let payload_len = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
    let payload = bytes
        .get(BODY_HEADER_LEN..BODY_HEADER_LEN + payload_len)
        .ok_or(WireError::Truncated)?;
    Ok((FrameHeader { priority, ttl, hop_count }, payload))
}

/// Associated data for a frame: `version | type | sender_peer_id`.
pub fn frame_aad(msg_type: MessageType, sender_peer_id: &[u8; PEER_ID_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(2 + PEER_ID_LEN);
    aad.push(FRAME_VERSION);
    aad.push(msg_type.to_byte());
    aad.extend_from_slice(sender_peer_id);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_roundtrips_through_its_byte_tag() {
        for mt in [
            MessageType::HandshakeInit,
            MessageType::HandshakeResp,
            MessageType::LedgerEntry,
            MessageType::SyncRequest,
            MessageType::SyncResponse,
            MessageType::MeshText,
            MessageType::MeshAck,
            MessageType::MeshDecoy,
        ] {
            assert_eq!(MessageType::from_byte(mt.to_byte()).unwrap(), mt);
        }
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        assert!(MessageType::from_byte(0x99).is_err());
    }

    #[test]
    fn body_header_roundtrips_with_payload() {
        let header = FrameHeader {
            priority: Priority::RealTime,
            ttl: 3,
            hop_count: 1,
        };
        let encoded = encode_body(&header, b"hello mesh");
        let (decoded, payload) = decode_body(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"hello mesh");
    }

    #[test]
    fn priority_ordering_is_critical_first() {
        let mut priorities = vec![Priority::Bulk, Priority::Critical, Priority::Normal, Priority::RealTime];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::RealTime, Priority::Normal, Priority::Bulk]
        );
    }
}
