//! Crate-level error taxonomy (§7). Every per-module error
//! (`StoreError`, `LedgerError`, `SessionError`, `SyncError`) maps into
//! exactly one `CoreError` variant here so callers at the task boundary can
//! apply one classification rule: validation failures never surface past
//! logging, only local-origin failures and unrecoverable store errors
//! propagate to the operator.

use thiserror::Error;

use crate::ledger::engine::LedgerError;
use crate::ledger::store::StoreError;
use crate::session::session::SessionError;
use crate::sync::engine::SyncError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Fails shape, signature, PoW, hash, sequence, or fee checks. Recovered
    /// locally: drop, count against the peer, never surface.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// Double-spend loser in the mempool. Surfaced to the submitter only for
    /// local originations.
    #[error("mempool conflict")]
    MempoolConflict,

    /// Handshake or AEAD failure. Triggers rotation and a behavior event;
    /// retried with a fresh handshake.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Link-level send/receive failure, or a deadline exceeded. Counted
    /// against the peer and retried with backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Persistent storage I/O or corruption. Fatal for the writer task; the
    /// node enters degraded read-only mode and surfaces for operator
    /// intervention.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl CoreError {
    /// Per §7: only `Store` is fatal for the writer task.
    /// Everything else is either silently dropped (validation) or retried
    /// (session/transport).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::Store(_))
    }
}

impl From<LedgerError> for CoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidEntry(reason) => CoreError::InvalidEntry(reason.to_string()),
            LedgerError::MempoolConflict => CoreError::MempoolConflict,
            LedgerError::Store(e) => CoreError::Store(e),
        }
    }
}

impl From<SyncError> for CoreError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(e) => CoreError::Store(e),
        }
    }
}
