//! C0: Node orchestrator. Owns the initialization graph
//! `Store -> Crypto -> Session -> Dispatcher -> Ledger -> Sync` and spawns
//! the long-lived tasks of §5: the Ledger Writer (folded into
//! the Commit Loop here, since both touch only the store's single writer
//! lock), parallel Validators, the Dispatcher, a periodic Sync task, and the
//! Mempool Sweeper. Exposed as a library (`Node::new` + the task-spawning
//! methods) and driven by the `meshledgerd` binary.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::crypto::aead::CipherKind;
use crate::error::CoreError;
use crate::events::{EventBus, SharedReputationProvider, StaticReputationProvider};
use crate::identity::NodeIdentity;
use crate::ledger::engine::LedgerEngine;
use crate::ledger::store::{InMemoryLedgerStore, LedgerStore, SledLedgerStore};
use crate::ledger::types::LedgerEntry;
use crate::mesh::dispatcher::{Dispatcher, DispatcherConfig};
use crate::mesh::message::MeshMessage;
use crate::mesh::obfuscator::Obfuscator;
use crate::peer_table::PeerTable;
use crate::session::link::LinkRegistry;
use crate::session::session::SessionTable;
use crate::session::transport::SessionLinkTransport;
use crate::sync::engine::SyncEngine;
use crate::wire::Priority;

fn cipher_from_config(name: &str) -> CipherKind {
    match name {
        "chacha20poly1305" => CipherKind::ChaCha20Poly1305,
        _ => CipherKind::Aes256Gcm,
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn LedgerStore>, CoreError> {
    match config.storage.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryLedgerStore::new())),
        "sled" => {
            let path = std::path::Path::new(&config.storage.data_dir).join("ledger.sled");
            let store = SledLedgerStore::open(path.to_string_lossy().as_ref())
                .map_err(|e| CoreError::Initialization(format!("failed to open sled store: {e}")))?;
            Ok(Arc::new(store))
        }
        other => Err(CoreError::Config(format!("unknown storage backend '{other}'"))),
    }
}

pub struct Node {
    pub config: Config,
    pub identity: Arc<NodeIdentity>,
    pub store: Arc<dyn LedgerStore>,
    pub ledger: Arc<LedgerEngine>,
    pub sync: Arc<SyncEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionTable>,
    pub links: Arc<LinkRegistry>,
    pub transport: Arc<SessionLinkTransport>,
    pub peer_table: Arc<PeerTable>,
    pub events: Arc<EventBus>,
    pub obfuscator: Arc<Obfuscator>,
    incoming_entries_tx: mpsc::Sender<LedgerEntry>,
    incoming_entries_rx: AsyncMutex<Option<mpsc::Receiver<LedgerEntry>>>,
}

impl Node {
    pub fn new(config: Config, identity: NodeIdentity) -> Result<Self, CoreError> {
        let identity = Arc::new(identity);
        let node_id_bytes = identity.node_id_bytes();
        let node_id_hex = identity.node_id();

        let store = build_store(&config)?;

        let ledger = Arc::new(LedgerEngine::new(
            store.clone(),
            node_id_bytes,
            config.ledger.min_fee,
            config.ledger.pow_difficulty,
        ));
        let sync = Arc::new(SyncEngine::new(store.clone(), config.sync.response_max_entries));

        let peer_table = Arc::new(PeerTable::new(store.clone(), config.mesh.failure_quarantine_threshold));
        let events = Arc::new(EventBus::default());
        let reputation: SharedReputationProvider = Arc::new(StaticReputationProvider::default());
        let obfuscator = Arc::new(Obfuscator::new(config.obfuscator.clone()));

        let sessions = Arc::new(SessionTable::new());
        let links = Arc::new(LinkRegistry::new());
        let transport = Arc::new(SessionLinkTransport::new(
            node_id_bytes,
            sessions.clone(),
            links.clone(),
            cipher_from_config(&config.session.cipher),
            obfuscator.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            node_id_hex,
            DispatcherConfig {
                priority_fairness_cap: config.mesh.priority_fairness_cap,
                max_retries: config.mesh.max_retries,
                retry_backoff_ms: config.mesh.retry_backoff_ms,
                dedup_window: Duration::from_secs(config.mesh.dedup_window_secs),
                broadcast_fanout: config.mesh.broadcast_fanout,
            },
            peer_table.clone(),
            reputation,
            events.clone(),
            transport.clone(),
        ));

        let (incoming_entries_tx, incoming_entries_rx) = mpsc::channel(256);

        Ok(Self {
            config,
            identity,
            store,
            ledger,
            sync,
            dispatcher,
            sessions,
            links,
            transport,
            peer_table,
            events,
            obfuscator,
            incoming_entries_tx,
            incoming_entries_rx: AsyncMutex::new(Some(incoming_entries_rx)),
        })
    }

    /// Handle for feeding entries received over the wire (after session
    /// decryption) into the Validator pool.
    pub fn incoming_entries_sender(&self) -> mpsc::Sender<LedgerEntry> {
        self.incoming_entries_tx.clone()
    }

    /// Local origination (application call path): submits and commits
    /// synchronously into the mempool, then queues a broadcast gossip
    /// message so peers learn of it. Returns the committed entry.
    #[instrument(skip(self))]
    pub async fn submit_transfer(
        &self,
        sender_id: &str,
        receiver_id: &str,
        amount: i64,
        fee: i64,
        input_utxo_hash: Option<[u8; 32]>,
    ) -> Result<LedgerEntry, CoreError> {
        let entry = self
            .ledger
            .build_and_submit(
                self.identity.signing_key(),
                sender_id,
                receiver_id,
                amount,
                fee,
                input_utxo_hash,
                &self.identity.node_id(),
            )
            .await?;

        let payload = bincode::serialize(&entry)
            .map_err(|e| CoreError::Transport(format!("failed to serialize entry for gossip: {e}")))?;
        let msg = MeshMessage::new_broadcast(self.identity.node_id(), Priority::Normal, self.config.mesh.ttl_default, payload);
        self.dispatcher.enqueue(msg).await;

        Ok(entry)
    }

    /// Spawns every long-lived task and registers its handle with
    /// `register`. Returns once all tasks are spawned; the tasks themselves
    /// run until `cancellation` fires.
    pub fn spawn_tasks(
        self: &Arc<Self>,
        cancellation: CancellationToken,
        mut register: impl FnMut(JoinHandle<()>),
    ) {
        register(self.clone().spawn_commit_loop(cancellation.clone()));
        register(self.clone().spawn_validators(cancellation.clone()));
        register(self.clone().spawn_mempool_sweeper(cancellation.clone()));
        register(self.clone().spawn_sync_task(cancellation.clone()));
        register(self.clone().spawn_decoy_task(cancellation.clone()));

        let dispatcher = self.dispatcher.clone();
        let dispatcher_cancel = cancellation.clone();
        register(tokio::spawn(async move {
            dispatcher.run(dispatcher_cancel).await;
        }));
    }

    /// One task: drains the mempool head and commits it, looping until
    /// cancelled. This is the *only* task that calls `commit_once`, giving
    /// C2's single-writer invariant a single caller as well.
    fn spawn_commit_loop(self: Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if cancellation.is_cancelled() {
                    break;
                }
                match self.ledger.commit_once().await {
                    Ok(Some(entry)) => {
                        info!(entry_id = %entry.entry_id, seq = entry.sequence_number, "committed ledger entry");
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                            _ = cancellation.cancelled() => break,
                        }
                    }
                    Err(err) => {
                        warn!(%err, "commit loop error");
                        if !err.is_recoverable() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Parallel, stateless verification of incoming entries: pulls from the
    /// incoming-entries channel and submits each to the Ledger Engine's
    /// receive-and-route pipeline. Validation failures are dropped silently
    /// per §7; they never propagate past this task.
    fn spawn_validators(self: Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rx = match self.incoming_entries_rx.lock().await.take() {
                Some(rx) => rx,
                None => return,
            };
            loop {
                tokio::select! {
                    maybe_entry = rx.recv() => {
                        let Some(entry) = maybe_entry else { break };
                        let received_at = chrono::Utc::now().timestamp();
                        if let Err(err) = self.ledger.receive_and_route(entry, received_at).await {
                            warn!(%err, "rejected incoming entry");
                        }
                    }
                    _ = cancellation.cancelled() => break,
                }
            }
        })
    }

    /// Periodically evicts mempool entries older than the configured max
    /// age.
    fn spawn_mempool_sweeper(self: Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = Duration::from_secs(self.config.ledger.mempool_sweep_interval_secs.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancellation.cancelled() => break,
                }
                let now = chrono::Utc::now().timestamp();
                match self.ledger.mempool().sweep(now, self.config.ledger.mempool_max_age_secs).await {
                    Ok(evicted) if evicted > 0 => info!(evicted, "swept aged mempool entries"),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "mempool sweep failed"),
                }
            }
        })
    }

    /// Periodically picks a random known peer and exchanges a delta-sync
    /// round with it over the mesh (out-of-band, same session/link pipes as
    /// ordinary traffic).
    fn spawn_sync_task(self: Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = Duration::from_secs(self.config.sync.interval_secs.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancellation.cancelled() => break,
                }

                let peer = match self.peer_table.pick_random().await {
                    Ok(Some(peer)) => peer,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%err, "failed to pick a sync peer");
                        continue;
                    }
                };

                let request = match self.sync.build_request().await {
                    Ok(request) => request,
                    Err(err) => {
                        warn!(%err, "failed to build sync request");
                        continue;
                    }
                };

                let payload = match bincode::serialize(&request) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(%err, "failed to serialize sync request");
                        continue;
                    }
                };

                let msg = MeshMessage::new_directed(
                    self.identity.node_id(),
                    peer.peer_id.clone(),
                    Priority::Bulk,
                    self.config.mesh.ttl_default,
                    payload,
                );
                self.dispatcher.enqueue(msg).await;
            }
        })
    }

    /// Drives C8's decoy cover traffic: ticks once a second, tracks how long
    /// the dispatcher has sat idle, and emits a decoy frame to a random known
    /// peer once the configured decoy rate says one is due. A no-op unless
    /// `ObfuscatorConfig.decoy_enabled` is set.
    fn spawn_decoy_task(self: Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut idle_secs: f64 = 0.0;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = cancellation.cancelled() => break,
                }

                if !self.dispatcher.is_idle() {
                    idle_secs = 0.0;
                    continue;
                }
                idle_secs += 1.0;

                if !self.obfuscator.should_emit_decoy(idle_secs) {
                    continue;
                }

                let peer = match self.peer_table.pick_random().await {
                    Ok(Some(peer)) => peer,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%err, "failed to pick a peer for decoy traffic");
                        continue;
                    }
                };

                if let Err(err) = self.transport.send_decoy(&peer.peer_id).await {
                    warn!(%err, peer_id = %peer.peer_id, "failed to send decoy frame");
                }
                idle_secs = 0.0;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = "memory".to_string();
        config
    }

    #[tokio::test]
    async fn submit_transfer_commits_into_the_mempool_and_queues_a_broadcast() {
        let node = Node::new(memory_config(), NodeIdentity::generate()).unwrap();
        let sender_id = node.identity.node_id();

        let entry = node
            .submit_transfer(&sender_id, "receiver", 10, 1, None)
            .await
            .unwrap();

        assert_eq!(entry.sequence_number, 1);
        assert!(!node.dispatcher.is_idle());
    }

    #[tokio::test]
    async fn commit_loop_drops_the_already_committed_gossip_copy_without_regressing_the_watermark() {
        let node = Arc::new(Node::new(memory_config(), NodeIdentity::generate()).unwrap());
        let sender_id = node.identity.node_id();
        node.submit_transfer(&sender_id, "receiver", 10, 1, None).await.unwrap();

        // submit_transfer already committed this entry directly; the commit
        // loop pulling its mempool (gossip) copy back out must recognize it
        // as stale rather than recommitting and regressing the watermark.
        let committed = node.ledger.commit_once().await.unwrap();
        assert!(committed.is_none());
        assert_eq!(node.ledger.mempool().len().await.unwrap(), 0);

        let watermark = node.store.get_watermark(&sender_id).await.unwrap().unwrap();
        assert_eq!(watermark.last_sequence_number, 1);
    }

    #[tokio::test]
    async fn multiple_local_originations_do_not_regress_the_watermark_through_the_commit_loop() {
        let node = Arc::new(Node::new(memory_config(), NodeIdentity::generate()).unwrap());
        let sender_id = node.identity.node_id();

        node.submit_transfer(&sender_id, "receiver", 10, 5, None).await.unwrap();
        node.submit_transfer(&sender_id, "receiver", 10, 10, None).await.unwrap();

        // Fee-ranked mempool order pulls the higher-fee (later-sequenced)
        // entry first; both are already committed, so both iterations must
        // be no-ops and the watermark must stay at its true value.
        assert!(node.ledger.commit_once().await.unwrap().is_none());
        assert!(node.ledger.commit_once().await.unwrap().is_none());
        assert_eq!(node.ledger.mempool().len().await.unwrap(), 0);

        let watermark = node.store.get_watermark(&sender_id).await.unwrap().unwrap();
        assert_eq!(watermark.last_sequence_number, 2);

        let third = node
            .submit_transfer(&sender_id, "receiver", 10, 1, None)
            .await
            .unwrap();
        assert_eq!(third.sequence_number, 3);
    }
}
