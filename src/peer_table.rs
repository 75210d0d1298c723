//! C9: Peer Table — known peers, last-seen, failure counts, uniform random
//! selection for gossip fan-out. A thin policy layer over the store's
//! `peers_*` operations (mirroring C4's relationship to the store), adding
//! the quarantine-after-failure-threshold rule. Grounded in the teacher's
//! violation-count-then-ban shape (`network::blacklist::IPBlacklist`), minus
//! its IP-address/whitelist machinery — this spec has one peer kind and one
//! threshold.

use std::sync::Arc;

use chrono::Utc;

use crate::ledger::store::{LedgerStore, StoreError};
use crate::ledger::types::PeerRecord;

pub struct PeerTable {
    store: Arc<dyn LedgerStore>,
    quarantine_threshold: u32,
}

impl PeerTable {
    pub fn new(store: Arc<dyn LedgerStore>, quarantine_threshold: u32) -> Self {
        Self {
            store,
            quarantine_threshold,
        }
    }

    /// Upserts a peer record on every successful link, resetting its
    /// failure count and bumping `last_seen` to now.
    pub async fn record_success(&self, peer_id: &str, address: &str) -> Result<(), StoreError> {
        self.store
            .peers_upsert(PeerRecord {
                peer_id: peer_id.to_string(),
                address: address.to_string(),
                last_seen: Utc::now().timestamp(),
                failure_count: 0,
            })
            .await
    }

    /// Increments `failure_count`, preserving `last_seen` and `address`.
    /// Returns `true` once the peer has crossed the quarantine threshold —
    /// callers stop selecting it for dispatch until a future success resets
    /// the count via `record_success`.
    pub async fn record_failure(&self, peer_id: &str) -> Result<bool, StoreError> {
        let existing = self
            .store
            .peers_list(usize::MAX)
            .await?
            .into_iter()
            .find(|p| p.peer_id == peer_id);

        let updated = match existing {
            Some(mut peer) => {
                peer.failure_count += 1;
                peer
            }
            None => PeerRecord {
                peer_id: peer_id.to_string(),
                address: String::new(),
                last_seen: Utc::now().timestamp(),
                failure_count: 1,
            },
        };

        let quarantined = updated.failure_count >= self.quarantine_threshold;
        self.store.peers_upsert(updated).await?;
        Ok(quarantined)
    }

    pub async fn is_quarantined(&self, peer_id: &str) -> Result<bool, StoreError> {
        let peer = self
            .store
            .peers_list(usize::MAX)
            .await?
            .into_iter()
            .find(|p| p.peer_id == peer_id);
        Ok(peer.map(|p| p.failure_count >= self.quarantine_threshold).unwrap_or(false))
    }

    /// Uniformly samples one known peer, for gossip fan-out and periodic
    /// delta-sync target selection (C5).
    pub async fn pick_random(&self) -> Result<Option<PeerRecord>, StoreError> {
        self.store.peers_pick_random().await
    }

    /// Known peers, excluding quarantined ones, preferring recent
    /// `last_seen`.
    pub async fn active_peers(&self, limit: usize) -> Result<Vec<PeerRecord>, StoreError> {
        let all = self.store.peers_list(limit.max(1) * 4).await?;
        let active: Vec<PeerRecord> = all
            .into_iter()
            .filter(|p| p.failure_count < self.quarantine_threshold)
            .take(limit)
            .collect();
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::InMemoryLedgerStore;

    #[tokio::test]
    async fn repeated_failures_cross_the_quarantine_threshold() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let table = PeerTable::new(store, 3);

        assert!(!table.record_failure("peer-1").await.unwrap());
        assert!(!table.record_failure("peer-1").await.unwrap());
        assert!(table.record_failure("peer-1").await.unwrap());
        assert!(table.is_quarantined("peer-1").await.unwrap());
    }

    #[tokio::test]
    async fn success_resets_failure_count_and_lifts_quarantine() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let table = PeerTable::new(store, 2);

        table.record_failure("peer-1").await.unwrap();
        table.record_failure("peer-1").await.unwrap();
        assert!(table.is_quarantined("peer-1").await.unwrap());

        table.record_success("peer-1", "addr:1").await.unwrap();
        assert!(!table.is_quarantined("peer-1").await.unwrap());
    }

    #[tokio::test]
    async fn active_peers_excludes_quarantined_entries() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let table = PeerTable::new(store, 2);

        table.record_success("good", "a").await.unwrap();
        table.record_failure("bad").await.unwrap();
        table.record_failure("bad").await.unwrap();

        let active = table.active_peers(10).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].peer_id, "good");
    }
}
