//! Core ledger entities: UTXO, SequenceWatermark, LedgerEntry. See §3.

use crate::crypto::hash::{canonical_preimage, sha256, Hash256};
use serde::{Deserialize, Serialize};

/// `(counter, node_id)` logical clock. Incremented on local events and set to
/// `max(local, received) + 1` on receive; orders causally related events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LamportTimestamp {
    pub counter: u64,
    pub node_id: [u8; 32],
}

impl LamportTimestamp {
    pub fn new(node_id: [u8; 32]) -> Self {
        Self { counter: 0, node_id }
    }

    pub fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub fn observe(&mut self, received_counter: u64) {
        self.counter = self.counter.max(received_counter) + 1;
    }
}

/// An unspent output: a spendable value unit keyed by the hash of the entry
/// that produced it. Exists in the store iff unspent (see LedgerStore contract).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub utxo_hash: Hash256,
    pub amount: i64,
    pub owner_id: String,
    pub created_at: i64,
}

/// Per-sender committed-sequence high-water mark. At most one exists per sender;
/// committed sequence numbers from that sender are strictly increasing with no gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceWatermark {
    pub sender_id: String,
    pub last_sequence_number: i64,
    pub last_entry_hash: Hash256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Pending,
    Accepted,
}

/// The atomic unit of transfer. See §3 for field-by-field semantics
/// and §6 for the canonical preimage used to hash and sign it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sequence_number: i64,
    pub previous_entry_hash: Option<Hash256>,
    pub amount: i64,
    pub fee: i64,
    pub input_utxo_hash: Option<Hash256>,
    pub pow_nonce: String,
    pub lamport_counter: u64,
    pub lamport_node_id: String,
    pub wall_clock_time: i64,
    pub sender_signature: Vec<u8>,
    pub receiver_signature: Option<Vec<u8>>,
    pub entry_hash: Hash256,
    pub status: EntryStatus,
}

/// A fixed `coin_type_id` and `seq_nonce` are part of the wire's canonical
/// preimage but carry no semantics this spec assigns meaning to beyond being
/// present in the hash; a single-asset node uses a constant coin type and an
/// empty sequence nonce unless a future multi-asset extension needs them.
pub const COIN_TYPE_ID: &str = "default";

impl LedgerEntry {
    pub fn preimage(&self) -> Vec<u8> {
        let input_hex = self.input_utxo_hash.map(hex::encode);
        canonical_preimage(
            &self.entry_id,
            self.sequence_number,
            &self.entry_id,
            &self.sender_id,
            &self.receiver_id,
            self.amount,
            self.fee,
            COIN_TYPE_ID,
            input_hex.as_deref(),
            &self.pow_nonce,
            self.lamport_counter,
            &self.lamport_node_id,
            "",
        )
    }

    /// SHA-256 over the canonical preimage of every field except `entry_hash`
    /// itself (and `status`, which is not part of the signed/hashed record).
    pub fn compute_hash(&self) -> Hash256 {
        sha256(&self.preimage())
    }

    pub fn hash_is_valid(&self) -> bool {
        self.compute_hash() == self.entry_hash
    }
}

/// Wrapper around a LedgerEntry awaiting commit. Ordered by `(fee DESC, received_at ASC)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub entry: LedgerEntry,
    pub received_at: i64,
    pub fee: i64,
}

impl MempoolEntry {
    pub fn new(entry: LedgerEntry, received_at: i64) -> Self {
        let fee = entry.fee;
        Self {
            entry,
            received_at,
            fee,
        }
    }
}

/// Known peers, last-seen, failure counts (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: String,
    pub last_seen: i64,
    pub failure_count: u32,
}
