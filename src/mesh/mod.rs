//! Mesh Traffic Core: C7 (prioritized, flood-suppressed, reputation-weighted
//! dispatch) and C8 (traffic obfuscation), operating on the `MeshMessage`
//! envelope defined here.

pub mod dedup;
pub mod dispatcher;
pub mod message;
pub mod obfuscator;
