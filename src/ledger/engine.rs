//! C3: Ledger Engine — build-and-submit (local origination), receive-and-route
//! (from peer), and the commit loop. See §4.2.

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::{pow, signing};
use crate::ledger::mempool::{AdmissionOutcome, Mempool};
use crate::ledger::store::{LedgerStore, StoreError};
use crate::ledger::types::{EntryStatus, LamportTimestamp, LedgerEntry, MempoolEntry, SequenceWatermark, Utxo};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid entry: {0}")]
    InvalidEntry(&'static str),
    #[error("mempool conflict")]
    MempoolConflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Validation failures never surface past the caller's logging; only
    /// store errors are fatal for the writer task (§7).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LedgerError::Store(_))
    }
}

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    mempool: Mempool,
    lamport: Mutex<LamportTimestamp>,
    min_fee: i64,
    pow_difficulty: u32,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, node_id: [u8; 32], min_fee: i64, pow_difficulty: u32) -> Self {
        Self {
            mempool: Mempool::new(store.clone()),
            store,
            lamport: Mutex::new(LamportTimestamp::new(node_id)),
            min_fee,
            pow_difficulty,
        }
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Advances the local Lamport clock on receipt of a foreign counter,
    /// per §5 ordering guarantees.
    pub fn observe_lamport(&self, received_counter: u64) {
        self.lamport.lock().observe(received_counter);
    }

    /// Local origination. Commits the watermark/UTXO mutation directly (the
    /// node trusts its own signing key) and stages the same entry into the
    /// mempool for gossip dispatch. The commit loop later pulls this same
    /// entry back out of the mempool; `commit_once`'s watermark-monotonicity
    /// guard recognizes it as already committed and drops it without
    /// recommitting.
    pub async fn build_and_submit(
        &self,
        sender_key: &SigningKey,
        sender_id: &str,
        receiver_id: &str,
        amount: i64,
        fee: i64,
        input_utxo_hash: Option<[u8; 32]>,
        node_id: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidEntry("amount must be positive"));
        }
        if fee < self.min_fee {
            return Err(LedgerError::InvalidEntry("fee below configured minimum"));
        }
        if let Some(hash) = input_utxo_hash {
            if !self.store.utxo_exists(&hash).await? {
                return Err(LedgerError::InvalidEntry("input utxo not found"));
            }
        }

        let watermark = self.store.get_watermark(sender_id).await?;
        let (sequence_number, previous_entry_hash) = match &watermark {
            Some(w) => (w.last_sequence_number + 1, Some(w.last_entry_hash)),
            None => (1, None),
        };

        let entry_id = Uuid::new_v4().to_string();
        let lamport_counter = self.lamport.lock().tick();
        let pow_nonce = pow::mine(sender_id, &entry_id, lamport_counter, self.pow_difficulty);
        let wall_clock_time = Utc::now().timestamp();

        let mut entry = LedgerEntry {
            entry_id,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            sequence_number,
            previous_entry_hash,
            amount,
            fee,
            input_utxo_hash,
            pow_nonce,
            lamport_counter,
            lamport_node_id: node_id.to_string(),
            wall_clock_time,
            sender_signature: Vec::new(),
            receiver_signature: None,
            entry_hash: [0u8; 32],
            status: EntryStatus::Accepted,
        };

        entry.sender_signature = signing::sign(sender_key, &entry.preimage()).to_vec();
        entry.entry_hash = entry.compute_hash();

        let mut txn = self.store.begin();
        if let Some(hash) = input_utxo_hash {
            txn.spend_utxo(hash);
        }
        txn.upsert_watermark(SequenceWatermark {
            sender_id: sender_id.to_string(),
            last_sequence_number: sequence_number,
            last_entry_hash: entry.entry_hash,
        });
        txn.insert_utxo(Utxo {
            utxo_hash: entry.entry_hash,
            amount,
            owner_id: receiver_id.to_string(),
            created_at: wall_clock_time,
        });
        txn.append_log(entry.clone());
        self.store.commit(txn).await?;

        self.mempool
            .try_admit(MempoolEntry::new(entry.clone(), wall_clock_time))
            .await?;

        Ok(entry)
    }

    /// Validates an entry received from a peer, cheapest check first, and
    /// stages it into the mempool on success. Returns `InvalidEntry` for
    /// every validation failure; callers drop the entry silently and may
    /// count it against the originating peer's `failure_count`, but must
    /// never surface it further (§7).
    pub async fn receive_and_route(
        &self,
        mut entry: LedgerEntry,
        received_at: i64,
    ) -> Result<AdmissionOutcome, LedgerError> {
        if entry.amount <= 0 {
            return Err(LedgerError::InvalidEntry("amount must be positive"));
        }
        if entry.sequence_number <= 0 {
            return Err(LedgerError::InvalidEntry("sequence number must be positive"));
        }
        if entry.sender_id.is_empty() || entry.receiver_id.is_empty() {
            return Err(LedgerError::InvalidEntry("sender and receiver ids are required"));
        }

        let sender_pubkey_bytes = hex::decode(&entry.sender_id)
            .map_err(|_| LedgerError::InvalidEntry("malformed sender public key"))?;
        let sender_pubkey = signing::public_key_from_bytes(&sender_pubkey_bytes)
            .map_err(|_| LedgerError::InvalidEntry("malformed sender public key"))?;
        signing::verify(&sender_pubkey, &entry.preimage(), &entry.sender_signature)
            .map_err(|_| LedgerError::InvalidEntry("sender signature does not verify"))?;

        let watermark = self.store.get_watermark(&entry.sender_id).await?;
        let last_seq = watermark.as_ref().map(|w| w.last_sequence_number).unwrap_or(0);
        if entry.sequence_number <= last_seq {
            return Err(LedgerError::InvalidEntry("sequence number already seen"));
        }

        if !pow::verify(
            &entry.sender_id,
            &entry.entry_id,
            entry.lamport_counter,
            &entry.pow_nonce,
            self.pow_difficulty,
        ) {
            return Err(LedgerError::InvalidEntry("proof-of-work below configured difficulty"));
        }

        if let Some(hash) = entry.input_utxo_hash {
            if !self.store.utxo_exists(&hash).await? {
                return Err(LedgerError::InvalidEntry("input utxo does not exist"));
            }
        }

        if !entry.hash_is_valid() {
            return Err(LedgerError::InvalidEntry("entry hash does not match canonical preimage"));
        }

        if entry.fee < self.min_fee {
            return Err(LedgerError::InvalidEntry("fee below configured minimum"));
        }
        // receiver_signature, if present, is advisory only and never blocks commit
        // (§9 open-question resolution).

        if entry.sequence_number != last_seq + 1 {
            return Err(LedgerError::InvalidEntry("sequence gap; awaiting sync"));
        }

        entry.status = EntryStatus::Pending;
        let outcome = self
            .mempool
            .try_admit(MempoolEntry::new(entry, received_at))
            .await?;
        Ok(outcome)
    }

    /// One iteration of the commit loop: pulls the highest-priority mempool
    /// entry and, inside a single store transaction, spends its input UTXO,
    /// writes the watermark, creates the output UTXO, and removes the
    /// mempool entry. Returns `Ok(None)` when the mempool is empty, the head
    /// entry's input was already spent, or its sequence number has already
    /// been committed (stale in either case; dropped without commit).
    pub async fn commit_once(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        let candidate = match self.mempool.highest_priority_entry().await? {
            Some(e) => e,
            None => return Ok(None),
        };

        if let Some(hash) = candidate.entry.input_utxo_hash {
            if !self.store.utxo_exists(&hash).await? {
                self.mempool.remove(candidate.entry.entry_hash).await?;
                return Ok(None);
            }
        }

        // Mempool order is fee-ranked, not sequence-ranked, and a locally
        // originated entry is already committed by the time it reaches here
        // (see `build_and_submit`). Advancing the watermark unconditionally
        // would let a lower, already-superseded sequence regress it.
        let current_watermark = self.store.get_watermark(&candidate.entry.sender_id).await?;
        let current_seq = current_watermark.as_ref().map(|w| w.last_sequence_number).unwrap_or(0);
        if candidate.entry.sequence_number <= current_seq {
            self.mempool.remove(candidate.entry.entry_hash).await?;
            return Ok(None);
        }

        let mut committed = candidate.entry;
        committed.status = EntryStatus::Accepted;

        let mut txn = self.store.begin();
        if let Some(hash) = committed.input_utxo_hash {
            txn.spend_utxo(hash);
        }
        txn.upsert_watermark(SequenceWatermark {
            sender_id: committed.sender_id.clone(),
            last_sequence_number: committed.sequence_number,
            last_entry_hash: committed.entry_hash,
        });
        txn.insert_utxo(Utxo {
            utxo_hash: committed.entry_hash,
            amount: committed.amount,
            owner_id: committed.receiver_id.clone(),
            created_at: committed.wall_clock_time,
        });
        txn.remove_mempool(committed.entry_hash);
        txn.append_log(committed.clone());
        self.store.commit(txn).await?;
        Ok(Some(committed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::InMemoryLedgerStore;
    use rand::rngs::OsRng;

    fn engine() -> (LedgerEngine, SigningKey, String) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let key = SigningKey::generate(&mut OsRng);
        let sender_id = signing::public_key_to_hex(&key.verifying_key());
        let engine = LedgerEngine::new(store, [1u8; 32], 1, 0);
        (engine, key, sender_id)
    }

    #[tokio::test]
    async fn build_and_submit_advances_watermark_and_creates_output_utxo() {
        let (engine, key, sender_id) = engine();
        let entry = engine
            .build_and_submit(&key, &sender_id, "receiver", 100, 5, None, "node")
            .await
            .unwrap();

        assert_eq!(entry.sequence_number, 1);
        let wm = engine.store.get_watermark(&sender_id).await.unwrap().unwrap();
        assert_eq!(wm.last_sequence_number, 1);
        assert!(engine.store.utxo_exists(&entry.entry_hash).await.unwrap());
    }

    #[tokio::test]
    async fn receive_and_route_rejects_sequence_gap_before_pow_would_matter() {
        let (engine, key, sender_id) = engine();
        let first = engine
            .build_and_submit(&key, &sender_id, "receiver", 10, 1, None, "node")
            .await
            .unwrap();

        let mut gapped = first.clone();
        gapped.sequence_number = 7;
        gapped.entry_hash = gapped.compute_hash();
        gapped.sender_signature = signing::sign(&key, &gapped.preimage()).to_vec();

        let err = engine.receive_and_route(gapped, 0).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn receive_and_route_rejects_replay_of_already_committed_sequence() {
        let (engine, key, sender_id) = engine();
        let first = engine
            .build_and_submit(&key, &sender_id, "receiver", 10, 1, None, "node")
            .await
            .unwrap();
        engine.commit_once().await.unwrap();

        let err = engine.receive_and_route(first, 0).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidEntry(_)));
    }

    #[tokio::test]
    async fn commit_loop_drops_mempool_entry_whose_input_was_already_spent_elsewhere() {
        let (engine, key, sender_id) = engine();
        let mut entry = LedgerEntry {
            entry_id: "manual".into(),
            sender_id: sender_id.clone(),
            receiver_id: "receiver".into(),
            sequence_number: 1,
            previous_entry_hash: None,
            amount: 10,
            fee: 1,
            input_utxo_hash: Some([9u8; 32]),
            pow_nonce: "0".into(),
            lamport_counter: 1,
            lamport_node_id: "node".into(),
            wall_clock_time: 0,
            sender_signature: Vec::new(),
            receiver_signature: None,
            entry_hash: [0u8; 32],
            status: EntryStatus::Pending,
        };
        entry.sender_signature = signing::sign(&key, &entry.preimage()).to_vec();
        entry.entry_hash = entry.compute_hash();

        engine
            .mempool()
            .try_admit(MempoolEntry::new(entry, 0))
            .await
            .unwrap();

        let committed = engine.commit_once().await.unwrap();
        assert!(committed.is_none());
        assert_eq!(engine.mempool().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_loop_does_not_regress_the_watermark_for_already_committed_input_less_entries() {
        let (engine, key, sender_id) = engine();

        let a = engine
            .build_and_submit(&key, &sender_id, "receiver", 10, 5, None, "node")
            .await
            .unwrap();
        let b = engine
            .build_and_submit(&key, &sender_id, "receiver", 10, 10, None, "node")
            .await
            .unwrap();
        assert_eq!(a.sequence_number, 1);
        assert_eq!(b.sequence_number, 2);

        // Fee-ranked mempool pulls B (fee 10) before A (fee 5); both are
        // already committed by `build_and_submit`, so neither iteration
        // should recommit or move the watermark backward.
        assert!(engine.commit_once().await.unwrap().is_none());
        assert!(engine.commit_once().await.unwrap().is_none());
        assert_eq!(engine.mempool().len().await.unwrap(), 0);

        let watermark = engine.store.get_watermark(&sender_id).await.unwrap().unwrap();
        assert_eq!(watermark.last_sequence_number, 2);
        assert_eq!(watermark.last_entry_hash, b.entry_hash);
    }
}
