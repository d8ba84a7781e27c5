//! Broadcast fan-out: one producer byte stream, many consumer queues.
//!
//! A dedicated reader task owns the encoder child's stdout and replicates
//! each chunk into every registered viewer queue. Queues are bounded; a
//! viewer whose backlog hits the bound is evicted so it can never stall the
//! broadcast for everyone else.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Read size for the child's stdout.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Maximum chunks a viewer may have pending before it is dropped.
pub const VIEWER_QUEUE_CAPACITY: usize = 100;

/// One connected consumer, owned by the registry.
struct Viewer {
    sender: mpsc::Sender<Bytes>,
    connected_at: DateTime<Utc>,
}

/// Registry of active viewers, shared between the HTTP handlers (attach,
/// detach) and the reader task (distribute).
#[derive(Default)]
pub struct ViewerRegistry {
    viewers: RwLock<HashMap<Uuid, Viewer>>,
}

impl ViewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new viewer and hand back its queue.
    pub fn attach(&self) -> (Uuid, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        self.viewers.write().insert(
            id,
            Viewer {
                sender: tx,
                connected_at: Utc::now(),
            },
        );
        (id, rx)
    }

    /// Remove a viewer; returns whether it was still registered.
    pub fn detach(&self, id: &Uuid) -> bool {
        if let Some(viewer) = self.viewers.write().remove(id) {
            tracing::info!(
                viewer_id = %id,
                connected_secs = (Utc::now() - viewer.connected_at).num_seconds(),
                "Viewer detached"
            );
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        self.viewers.read().len()
    }

    /// Drop every viewer. Their queues close, ending the HTTP bodies.
    pub fn disconnect_all(&self) {
        let mut viewers = self.viewers.write();
        if !viewers.is_empty() {
            tracing::info!(count = viewers.len(), "Disconnecting all viewers");
            viewers.clear();
        }
    }

    /// Replicate one chunk into every queue, evicting viewers whose backlog
    /// is full. Eviction happens after the chunk was offered to everyone, so
    /// one broken consumer cannot delay healthy ones.
    pub fn distribute(&self, chunk: &Bytes) {
        let targets: Vec<(Uuid, mpsc::Sender<Bytes>)> = self
            .viewers
            .read()
            .iter()
            .map(|(id, v)| (*id, v.sender.clone()))
            .collect();

        let mut evict = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(viewer_id = %id, "Viewer backlog exceeded, dropping");
                    evict.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    evict.push(id);
                }
            }
        }

        if !evict.is_empty() {
            let mut viewers = self.viewers.write();
            for id in evict {
                viewers.remove(&id);
            }
        }
    }
}

/// Sent to the supervisor when a reader sees end-of-stream.
#[derive(Debug, Clone, Copy)]
pub struct ReaderExit {
    /// Generation of the child this reader was attached to. The supervisor
    /// ignores exits from superseded generations (planned replacements).
    pub generation: u64,
}

/// Read the child's stdout in fixed chunks and fan each one out.
///
/// Exits on end-of-stream or read error, notifying the supervisor with this
/// reader's generation.
pub async fn run_reader<R>(
    mut stdout: R,
    registry: Arc<ViewerRegistry>,
    bytes_out: Arc<AtomicU64>,
    generation: u64,
    exit_tx: mpsc::Sender<ReaderExit>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(generation, "Broadcast reader reached end-of-stream");
                break;
            }
            Ok(n) => {
                bytes_out.fetch_add(n as u64, Ordering::Relaxed);
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                registry.distribute(&chunk);
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "Broadcast reader failed");
                break;
            }
        }
    }

    let _ = exit_tx.send(ReaderExit { generation }).await;
}
