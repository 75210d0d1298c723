//! Link transport (C6/C7 boundary): a length-prefixed frame reader/writer
//! over any `AsyncRead + AsyncWrite`, and the `LinkRegistry` that gives the
//! Mesh Dispatcher one outbound channel per active peer — "Link tasks" in
//! §5. Binding a peer's link to an actual radio/socket stack is
//! a platform concern left to callers; this module only knows about bytes.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeds the maximum of {MAX_FRAME_LEN} bytes")]
    TooLarge,
    #[error("link channel closed")]
    Closed,
}

/// Writes one frame as `len(u32 LE) | bytes`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<(), LinkError> {
    if frame.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(LinkError::TooLarge);
    }
    writer.write_all(&(frame.len() as u32).to_le_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame, rejecting lengths over `MAX_FRAME_LEN`
/// before allocating.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, LinkError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(LinkError::TooLarge);
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// One outbound queue per peer, drained by a dedicated link task that owns
/// the actual `AsyncWrite` half. Decouples the dispatcher (which only ever
/// wants to enqueue bytes) from backpressure and I/O latency on any single
/// peer's transport.
#[derive(Default)]
pub struct LinkRegistry {
    outbound: DashMap<String, mpsc::Sender<Vec<u8>>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer's outbound channel. Spawning the task that drains
    /// `rx` into the peer's actual `AsyncWrite` half is the caller's job,
    /// since that half is platform-specific.
    pub fn register(&self, peer_id: &str, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.outbound.insert(peer_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, peer_id: &str) {
        self.outbound.remove(peer_id);
    }

    pub fn is_registered(&self, peer_id: &str) -> bool {
        self.outbound.contains_key(peer_id)
    }

    pub async fn send(&self, peer_id: &str, frame: Vec<u8>) -> Result<(), LinkError> {
        let sender = self.outbound.get(peer_id).map(|e| e.clone()).ok_or(LinkError::Closed)?;
        sender.send(frame).await.map_err(|_| LinkError::Closed)
    }
}

/// Drains `rx` into `writer` until the channel closes or a write fails.
/// This is the body of one "Link task" per active peer transport.
pub async fn run_link_writer<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if write_frame(&mut writer, &frame).await.is_err() {
            break;
        }
    }
}

pub type SharedLinkRegistry = Arc<LinkRegistry>;
