//! C5: Sync Engine — delta request/response using per-peer sequence vectors.

pub mod engine;
