//! C4: Mempool — fee-ranked pending entries with UTXO-conflict replacement
//! and TTL eviction. Holds no state of its own; it is a thin policy layer
//! over the store's `mempool_*` operations so that replacement stays atomic.

use std::sync::Arc;

use crate::ledger::store::{LedgerStore, StoreError};
use crate::ledger::types::MempoolEntry;

/// Outcome of offering an entry to the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Inserted,
    /// Replaced an incumbent entry spending the same input UTXO with a strictly
    /// higher fee (I7).
    Replaced,
    /// An incumbent with an equal-or-higher fee already holds the input UTXO.
    RejectedConflict,
}

/// Coarse backlog signal for upstream throttling; not part of the spec's
/// closed tunable set, just a read of current mempool size against soft
/// thresholds the node's own config supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Nominal,
    Elevated,
    Critical,
}

pub struct Mempool {
    store: Arc<dyn LedgerStore>,
}

impl Mempool {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Admits `entry`, resolving any conflict on its input UTXO by strict fee
    /// comparison (I7: a replacement's fee is always strictly greater than
    /// what it replaces). Entries with no input UTXO (e.g. initial
    /// endowments) never conflict.
    pub async fn try_admit(&self, entry: MempoolEntry) -> Result<AdmissionOutcome, StoreError> {
        if let Some(input_hash) = entry.entry.input_utxo_hash {
            let conflicts = self.store.mempool_list_by_input_utxo(&input_hash).await?;
            if let Some(incumbent) = conflicts.into_iter().next() {
                if entry.fee > incumbent.fee {
                    let mut txn = self.store.begin();
                    txn.remove_mempool(incumbent.entry.entry_hash);
                    txn.insert_mempool(entry);
                    self.store.commit(txn).await?;
                    return Ok(AdmissionOutcome::Replaced);
                }
                return Ok(AdmissionOutcome::RejectedConflict);
            }
        }

        let mut txn = self.store.begin();
        txn.insert_mempool(entry);
        self.store.commit(txn).await?;
        Ok(AdmissionOutcome::Inserted)
    }

    /// First entry by `(fee DESC, received_at ASC)`, the next candidate for
    /// the commit loop.
    pub async fn highest_priority_entry(&self) -> Result<Option<MempoolEntry>, StoreError> {
        Ok(self.store.mempool_list_ordered().await?.into_iter().next())
    }

    pub async fn remove(&self, entry_hash: [u8; 32]) -> Result<(), StoreError> {
        let mut txn = self.store.begin();
        txn.remove_mempool(entry_hash);
        self.store.commit(txn).await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.store.mempool_list_ordered().await?.len())
    }

    /// Evicts entries whose `received_at` is older than `now - max_age_secs`.
    /// Independent of commit; aged-out entries must never be committed.
    pub async fn sweep(&self, now: i64, max_age_secs: i64) -> Result<usize, StoreError> {
        let cutoff = now - max_age_secs;
        let aged = self.store.mempool_list_older_than(cutoff).await?;
        for stale in &aged {
            self.remove(stale.entry.entry_hash).await?;
        }
        Ok(aged.len())
    }

    pub async fn pressure(&self, elevated_at: usize, critical_at: usize) -> Result<PressureLevel, StoreError> {
        let size = self.len().await?;
        Ok(if size >= critical_at {
            PressureLevel::Critical
        } else if size >= elevated_at {
            PressureLevel::Elevated
        } else {
            PressureLevel::Nominal
        })
    }
}
