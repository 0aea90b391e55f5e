//! Streaming queue bridging the pull phase and the cloud uploader.
//!
//! The pull side pushes shield-approved relative paths as they land; the
//! upload side drains them in batches while the pull is still running.
//! Items a consumer has taken but not finished sit in a pending set so an
//! interrupted batch can be re-queued instead of lost.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// Default batch size for the cloud uploader.
pub const UPLOAD_BATCH: usize = 50;

#[derive(Default)]
struct Inner {
    items: VecDeque<String>,
    pending: HashSet<String>,
    /// Every path ever accepted this session. Uploads are idempotent but
    /// not free; a path goes through the queue at most once.
    seen: HashSet<String>,
    complete: bool,
    /// Items still pending when the producer declared completion.
    leaked: usize,
}

/// Multi-producer single-consumer path queue with completion semantics.
#[derive(Clone)]
pub struct StreamingQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl Default for StreamingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueue an approved path. Paths already seen this session are
    /// dropped.
    pub fn push(&self, path: String) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.complete {
                warn!("Queue push after completion, ignoring: {}", path);
                return;
            }
            if !inner.seen.insert(path.clone()) {
                return;
            }
            inner.items.push_back(path);
        }
        self.notify.notify_waiters();
    }

    /// Pre-mark a path as seen without queueing it. Used on resume so files
    /// a previous run already uploaded never go through the queue again.
    pub fn seed_seen(&self, path: String) {
        self.inner.lock().unwrap().seen.insert(path);
    }

    /// Mark a drained batch as in flight.
    pub fn mark_pending(&self, batch: &[String]) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.extend(batch.iter().cloned());
    }

    /// A batch finished uploading; forget it.
    pub fn clear_pending(&self, batch: &[String]) {
        let mut inner = self.inner.lock().unwrap();
        for item in batch {
            inner.pending.remove(item);
        }
    }

    /// Re-queue an interrupted batch for the next consumer pass.
    pub fn release_pending(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            let pending: Vec<String> = inner.pending.drain().collect();
            for item in pending {
                inner.items.push_back(item);
            }
        }
        self.notify.notify_waiters();
    }

    /// Producer is done; wakes any waiting consumer. Items still pending
    /// are counted as leaked.
    pub fn mark_complete(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.complete = true;
            if !inner.pending.is_empty() {
                inner.leaked = inner.pending.len();
                warn!(
                    "Queue completed with {} uploads still pending",
                    inner.leaked
                );
            }
        }
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Paths that were still in flight when the producer completed.
    pub fn leaked(&self) -> usize {
        self.inner.lock().unwrap().leaked
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    /// Await the next batch of at most `n` items. Returns `None` once the
    /// producer completed and the queue is drained.
    pub async fn next_batch(&self, n: usize) -> Option<Vec<String>> {
        loop {
            // Arm the notification before checking state so a push between
            // check and await cannot be missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.items.is_empty() {
                    let take = n.min(inner.items.len());
                    let batch: Vec<String> = inner.items.drain(..take).collect();
                    return Some(batch);
                }
                if inner.complete {
                    return None;
                }
            }
            notified.await;
        }
    }
}
