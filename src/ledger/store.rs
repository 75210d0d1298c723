//! C2: Ledger Store — UTXO set, per-sender sequence watermark, mempool, and
//! peer table, all mutated only through atomic transactions.
//!
//! Two implementations behind the same trait, mirroring the teacher's
//! storage-trait-plus-backend split: an in-memory store for tests and
//! ephemeral nodes, and a durable `sled`-backed store sized against available
//! system memory.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::crypto::hash::Hash256;
use crate::ledger::types::{LedgerEntry, MempoolEntry, PeerRecord, SequenceWatermark, Utxo};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Per §7: StoreError is fatal for the writer task, never a
    /// silently-recovered validation outcome.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Staged mutations for a single atomic commit. Mutations accumulate in
/// memory with no I/O; `rollback` is simply dropping the `Txn` before it is
/// ever passed to `commit`.
#[derive(Debug, Default)]
pub struct Txn {
    mutations: Vec<Mutation>,
}

#[derive(Debug)]
enum Mutation {
    InsertUtxo(Utxo),
    SpendUtxo(Hash256),
    UpsertWatermark(SequenceWatermark),
    InsertMempool(MempoolEntry),
    RemoveMempool(Hash256),
    AppendLog(LedgerEntry),
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_utxo(&mut self, utxo: Utxo) -> &mut Self {
        self.mutations.push(Mutation::InsertUtxo(utxo));
        self
    }

    pub fn spend_utxo(&mut self, hash: Hash256) -> &mut Self {
        self.mutations.push(Mutation::SpendUtxo(hash));
        self
    }

    pub fn upsert_watermark(&mut self, watermark: SequenceWatermark) -> &mut Self {
        self.mutations.push(Mutation::UpsertWatermark(watermark));
        self
    }

    pub fn insert_mempool(&mut self, entry: MempoolEntry) -> &mut Self {
        self.mutations.push(Mutation::InsertMempool(entry));
        self
    }

    pub fn remove_mempool(&mut self, hash: Hash256) -> &mut Self {
        self.mutations.push(Mutation::RemoveMempool(hash));
        self
    }

    /// Appends a committed entry to the durable ledger log, the only source
    /// the Sync Engine (C5) reads from when answering delta requests.
    pub fn append_log(&mut self, entry: LedgerEntry) -> &mut Self {
        self.mutations.push(Mutation::AppendLog(entry));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn begin(&self) -> Txn {
        Txn::new()
    }

    async fn commit(&self, txn: Txn) -> Result<(), StoreError>;

    /// Discards a `Txn` without applying it. Since mutations only exist in
    /// memory until `commit`, this never needs to undo persisted state.
    fn rollback(&self, _txn: Txn) {}

    async fn get_utxo(&self, hash: &Hash256) -> Result<Option<Utxo>, StoreError>;
    async fn utxo_exists(&self, hash: &Hash256) -> Result<bool, StoreError> {
        Ok(self.get_utxo(hash).await?.is_some())
    }

    async fn get_watermark(&self, sender_id: &str) -> Result<Option<SequenceWatermark>, StoreError>;
    /// All known senders' watermarks; the Sync Engine uses this to build the
    /// `sequences` vector covering every sender it has seen.
    async fn watermarks_list(&self) -> Result<Vec<SequenceWatermark>, StoreError>;

    async fn mempool_list_ordered(&self) -> Result<Vec<MempoolEntry>, StoreError>;
    async fn mempool_list_by_input_utxo(
        &self,
        hash: &Hash256,
    ) -> Result<Vec<MempoolEntry>, StoreError>;
    async fn mempool_list_older_than(&self, cutoff_secs: i64) -> Result<Vec<MempoolEntry>, StoreError>;

    async fn peers_upsert(&self, peer: PeerRecord) -> Result<(), StoreError>;
    async fn peers_pick_random(&self) -> Result<Option<PeerRecord>, StoreError>;
    async fn peers_list(&self, limit: usize) -> Result<Vec<PeerRecord>, StoreError>;

    /// Committed entries from `sender_id` with `sequence_number > after_seq`,
    /// ordered ascending by sequence, capped at `limit`. Backs the Sync
    /// Engine's bounded, cursorable delta responses.
    async fn log_list_since(
        &self,
        sender_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
}

fn mempool_key(entry: &MempoolEntry) -> Hash256 {
    entry.entry.entry_hash
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

pub struct InMemoryLedgerStore {
    utxos: DashMap<Hash256, Utxo>,
    watermarks: DashMap<String, SequenceWatermark>,
    mempool: DashMap<Hash256, MempoolEntry>,
    peers: DashMap<String, PeerRecord>,
    log: DashMap<Hash256, LedgerEntry>,
    writer_lock: AsyncMutex<()>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            utxos: DashMap::new(),
            watermarks: DashMap::new(),
            mempool: DashMap::new(),
            peers: DashMap::new(),
            log: DashMap::new(),
            writer_lock: AsyncMutex::new(()),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn commit(&self, txn: Txn) -> Result<(), StoreError> {
        let _guard = self.writer_lock.lock().await;
        for mutation in txn.mutations {
            match mutation {
                Mutation::InsertUtxo(utxo) => {
                    self.utxos.insert(utxo.utxo_hash, utxo);
                }
                Mutation::SpendUtxo(hash) => {
                    self.utxos.remove(&hash);
                }
                Mutation::UpsertWatermark(wm) => {
                    self.watermarks.insert(wm.sender_id.clone(), wm);
                }
                Mutation::InsertMempool(entry) => {
                    self.mempool.insert(mempool_key(&entry), entry);
                }
                Mutation::RemoveMempool(hash) => {
                    self.mempool.remove(&hash);
                }
                Mutation::AppendLog(entry) => {
                    self.log.insert(entry.entry_hash, entry);
                }
            }
        }
        Ok(())
    }

    async fn get_utxo(&self, hash: &Hash256) -> Result<Option<Utxo>, StoreError> {
        Ok(self.utxos.get(hash).map(|e| e.value().clone()))
    }

    async fn get_watermark(&self, sender_id: &str) -> Result<Option<SequenceWatermark>, StoreError> {
        Ok(self.watermarks.get(sender_id).map(|e| e.value().clone()))
    }

    async fn watermarks_list(&self) -> Result<Vec<SequenceWatermark>, StoreError> {
        Ok(self.watermarks.iter().map(|e| e.value().clone()).collect())
    }

    async fn mempool_list_ordered(&self) -> Result<Vec<MempoolEntry>, StoreError> {
        let mut entries: Vec<MempoolEntry> =
            self.mempool.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            b.fee
                .cmp(&a.fee)
                .then_with(|| a.received_at.cmp(&b.received_at))
        });
        Ok(entries)
    }

    async fn mempool_list_by_input_utxo(
        &self,
        hash: &Hash256,
    ) -> Result<Vec<MempoolEntry>, StoreError> {
        Ok(self
            .mempool
            .iter()
            .filter(|e| e.value().entry.input_utxo_hash.as_ref() == Some(hash))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn mempool_list_older_than(&self, cutoff_secs: i64) -> Result<Vec<MempoolEntry>, StoreError> {
        Ok(self
            .mempool
            .iter()
            .filter(|e| e.value().received_at < cutoff_secs)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn peers_upsert(&self, peer: PeerRecord) -> Result<(), StoreError> {
        self.peers.insert(peer.peer_id.clone(), peer);
        Ok(())
    }

    async fn peers_pick_random(&self) -> Result<Option<PeerRecord>, StoreError> {
        let all: Vec<PeerRecord> = self.peers.iter().map(|e| e.value().clone()).collect();
        Ok(all.choose(&mut rand::thread_rng()).cloned())
    }

    async fn peers_list(&self, limit: usize) -> Result<Vec<PeerRecord>, StoreError> {
        let mut all: Vec<PeerRecord> = self.peers.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all.truncate(limit);
        Ok(all)
    }

    async fn log_list_since(
        &self,
        sender_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut entries: Vec<LedgerEntry> = self
            .log
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| e.sender_id == sender_id && e.sequence_number > after_seq)
            .collect();
        entries.sort_by_key(|e| e.sequence_number);
        entries.truncate(limit);
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// sled-backed implementation
// ---------------------------------------------------------------------------

pub struct SledLedgerStore {
    utxos: sled::Tree,
    watermarks: sled::Tree,
    mempool: sled::Tree,
    peers: sled::Tree,
    log: sled::Tree,
    writer_lock: Arc<AsyncMutex<()>>,
}

impl SledLedgerStore {
    /// Sizes the sled cache against available system memory, matching the
    /// teacher's storage-sizing heuristic: 10% of available memory, capped.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        use sysinfo::{MemoryRefreshKind, RefreshKind, System};
        let sys =
            System::new_with_specifics(RefreshKind::new().with_memory(MemoryRefreshKind::everything()));
        let available = sys.available_memory();
        let cache_capacity = std::cmp::min(available / 10, 256 * 1024 * 1024);

        let db = sled::Config::new()
            .path(path)
            .cache_capacity(cache_capacity)
            .flush_every_ms(Some(1000))
            .mode(sled::Mode::HighThroughput)
            .open()?;

        Ok(Self {
            utxos: db.open_tree("utxos")?,
            watermarks: db.open_tree("watermarks")?,
            mempool: db.open_tree("mempool")?,
            peers: db.open_tree("peers")?,
            log: db.open_tree("ledger_log")?,
            writer_lock: Arc::new(AsyncMutex::new(())),
        })
    }
}

#[async_trait]
impl LedgerStore for SledLedgerStore {
    async fn commit(&self, txn: Txn) -> Result<(), StoreError> {
        let _guard = self.writer_lock.lock().await;
        let utxos = self.utxos.clone();
        let watermarks = self.watermarks.clone();
        let mempool = self.mempool.clone();
        let log = self.log.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            (&utxos, &watermarks, &mempool, &log)
                .transaction(|(utxos_tx, watermarks_tx, mempool_tx, log_tx)| {
                    for mutation in &txn.mutations {
                        match mutation {
                            Mutation::InsertUtxo(utxo) => {
                                let bytes = bincode::serialize(utxo)
                                    .map_err(sled::transaction::ConflictableTransactionError::Abort)?;
                                utxos_tx.insert(&utxo.utxo_hash[..], bytes)?;
                            }
                            Mutation::SpendUtxo(hash) => {
                                utxos_tx.remove(&hash[..])?;
                            }
                            Mutation::UpsertWatermark(wm) => {
                                let bytes = bincode::serialize(wm)
                                    .map_err(sled::transaction::ConflictableTransactionError::Abort)?;
                                watermarks_tx.insert(wm.sender_id.as_bytes(), bytes)?;
                            }
                            Mutation::InsertMempool(entry) => {
                                let key = mempool_key(entry);
                                let bytes = bincode::serialize(entry)
                                    .map_err(sled::transaction::ConflictableTransactionError::Abort)?;
                                mempool_tx.insert(&key[..], bytes)?;
                            }
                            Mutation::RemoveMempool(hash) => {
                                mempool_tx.remove(&hash[..])?;
                            }
                            Mutation::AppendLog(entry) => {
                                let bytes = bincode::serialize(entry)
                                    .map_err(sled::transaction::ConflictableTransactionError::Abort)?;
                                log_tx.insert(&entry.entry_hash[..], bytes)?;
                            }
                        }
                    }
                    Ok(())
                })
                .map_err(|e| match e {
                    sled::transaction::TransactionError::Abort(err) => err,
                    sled::transaction::TransactionError::Storage(err) => StoreError::Sled(err),
                })?;
            Ok(())
        })
        .await?
    }

    async fn get_utxo(&self, hash: &Hash256) -> Result<Option<Utxo>, StoreError> {
        let tree = self.utxos.clone();
        let key = *hash;
        tokio::task::spawn_blocking(move || -> Result<Option<Utxo>, StoreError> {
            match tree.get(&key[..])? {
                Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn get_watermark(&self, sender_id: &str) -> Result<Option<SequenceWatermark>, StoreError> {
        let tree = self.watermarks.clone();
        let sender_id = sender_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<SequenceWatermark>, StoreError> {
            match tree.get(sender_id.as_bytes())? {
                Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn watermarks_list(&self) -> Result<Vec<SequenceWatermark>, StoreError> {
        let tree = self.watermarks.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<SequenceWatermark>, StoreError> {
            let mut all = Vec::new();
            for item in tree.iter() {
                let (_, bytes) = item?;
                all.push(bincode::deserialize::<SequenceWatermark>(&bytes)?);
            }
            Ok(all)
        })
        .await?
    }

    async fn mempool_list_ordered(&self) -> Result<Vec<MempoolEntry>, StoreError> {
        let tree = self.mempool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<MempoolEntry>, StoreError> {
            let mut entries = Vec::new();
            for item in tree.iter() {
                let (_, bytes) = item?;
                entries.push(bincode::deserialize::<MempoolEntry>(&bytes)?);
            }
            entries.sort_by(|a, b| {
                b.fee
                    .cmp(&a.fee)
                    .then_with(|| a.received_at.cmp(&b.received_at))
            });
            Ok(entries)
        })
        .await?
    }

    async fn mempool_list_by_input_utxo(
        &self,
        hash: &Hash256,
    ) -> Result<Vec<MempoolEntry>, StoreError> {
        let all = self.mempool_list_ordered().await?;
        Ok(all
            .into_iter()
            .filter(|e| e.entry.input_utxo_hash.as_ref() == Some(hash))
            .collect())
    }

    async fn mempool_list_older_than(&self, cutoff_secs: i64) -> Result<Vec<MempoolEntry>, StoreError> {
        let all = self.mempool_list_ordered().await?;
        Ok(all.into_iter().filter(|e| e.received_at < cutoff_secs).collect())
    }

    async fn peers_upsert(&self, peer: PeerRecord) -> Result<(), StoreError> {
        let tree = self.peers.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let bytes = bincode::serialize(&peer)?;
            tree.insert(peer.peer_id.as_bytes(), bytes)?;
            Ok(())
        })
        .await?
    }

    async fn peers_pick_random(&self) -> Result<Option<PeerRecord>, StoreError> {
        let all = self.peers_list(usize::MAX).await?;
        Ok(all.choose(&mut rand::thread_rng()).cloned())
    }

    async fn peers_list(&self, limit: usize) -> Result<Vec<PeerRecord>, StoreError> {
        let tree = self.peers.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<PeerRecord>, StoreError> {
            let mut all = Vec::new();
            for item in tree.iter() {
                let (_, bytes) = item?;
                all.push(bincode::deserialize::<PeerRecord>(&bytes)?);
            }
            all.sort_by(|a: &PeerRecord, b: &PeerRecord| b.last_seen.cmp(&a.last_seen));
            all.truncate(limit);
            Ok(all)
        })
        .await?
    }

    async fn log_list_since(
        &self,
        sender_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let tree = self.log.clone();
        let sender_id = sender_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<LedgerEntry>, StoreError> {
            let mut entries = Vec::new();
            for item in tree.iter() {
                let (_, bytes) = item?;
                let entry: LedgerEntry = bincode::deserialize(&bytes)?;
                if entry.sender_id == sender_id && entry.sequence_number > after_seq {
                    entries.push(entry);
                }
            }
            entries.sort_by_key(|e| e.sequence_number);
            entries.truncate(limit);
            Ok(entries)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::EntryStatus;

    fn sample_utxo(hash: Hash256, amount: i64) -> Utxo {
        Utxo {
            utxo_hash: hash,
            amount,
            owner_id: "receiver".into(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn commit_is_atomic_across_tables() {
        let store = InMemoryLedgerStore::new();
        let mut txn = store.begin();
        txn.insert_utxo(sample_utxo([1u8; 32], 100));
        txn.upsert_watermark(SequenceWatermark {
            sender_id: "sender".into(),
            last_sequence_number: 1,
            last_entry_hash: [9u8; 32],
        });
        store.commit(txn).await.unwrap();

        assert!(store.utxo_exists(&[1u8; 32]).await.unwrap());
        assert_eq!(
            store.get_watermark("sender").await.unwrap().unwrap().last_sequence_number,
            1
        );
    }

    #[tokio::test]
    async fn spend_then_insert_in_same_txn_leaves_no_double_presence() {
        let store = InMemoryLedgerStore::new();
        let mut setup = store.begin();
        setup.insert_utxo(sample_utxo([2u8; 32], 50));
        store.commit(setup).await.unwrap();

        let mut spend_txn = store.begin();
        spend_txn.spend_utxo([2u8; 32]);
        spend_txn.insert_utxo(sample_utxo([3u8; 32], 50));
        store.commit(spend_txn).await.unwrap();

        assert!(!store.utxo_exists(&[2u8; 32]).await.unwrap());
        assert!(store.utxo_exists(&[3u8; 32]).await.unwrap());
    }

    #[tokio::test]
    async fn mempool_ordering_is_fee_desc_then_received_at_asc() {
        let store = InMemoryLedgerStore::new();
        let mk = |id: &str, fee: i64, at: i64| MempoolEntry::new(
            crate::ledger::types::LedgerEntry {
                entry_id: id.into(),
                sender_id: "s".into(),
                receiver_id: "r".into(),
                sequence_number: 1,
                previous_entry_hash: None,
                amount: 10,
                fee,
                input_utxo_hash: None,
                pow_nonce: "0".into(),
                lamport_counter: 1,
                lamport_node_id: "n".into(),
                wall_clock_time: 0,
                sender_signature: vec![],
                receiver_signature: None,
                entry_hash: sha256_of(id),
                status: EntryStatus::Pending,
            },
            at,
        );

        let mut txn = store.begin();
        txn.insert_mempool(mk("a", 10, 5));
        txn.insert_mempool(mk("b", 10, 1));
        txn.insert_mempool(mk("c", 20, 9));
        store.commit(txn).await.unwrap();

        let ordered = store.mempool_list_ordered().await.unwrap();
        let ids: Vec<&str> = ordered.iter().map(|e| e.entry.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    fn sha256_of(s: &str) -> Hash256 {
        crate::crypto::hash::sha256(s.as_bytes())
    }
}
