// src/store/queued.rs
//! Fire-and-forget write queue in front of a slower store

use super::{KeyValueStore, SharedStore};
use crate::error::{RecorderError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::{sync::Notify, task::JoinHandle};

/// Latest pending value per key; `None` is a removal
#[derive(Debug, Default)]
struct Pending {
    writes: Vec<(String, Option<Vec<u8>>)>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Queue {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl Queue {
    fn lock(&self) -> Result<MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| RecorderError::Storage("write queue lock poisoned".to_string()))
    }

    /// Record a write, replacing any not yet applied for the same key
    fn push(&self, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        {
            let mut pending = self.lock()?;
            if pending.closed {
                return Err(RecorderError::Storage("write queue is closed".to_string()));
            }
            match pending.writes.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value,
                None => pending.writes.push((key.to_string(), value)),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    fn take(&self) -> Result<(Vec<(String, Option<Vec<u8>>)>, bool)> {
        let mut pending = self.lock()?;
        Ok((std::mem::take(&mut pending.writes), pending.closed))
    }

    fn close(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.closed = true;
        }
        self.notify.notify_one();
    }
}

/// Store whose writes return immediately and are applied by a background
/// writer. Only the latest value per key is kept while the writer is busy.
/// Reads go straight to the inner store, so a read only observes writes the
/// writer has already applied.
pub struct QueuedStore {
    inner: SharedStore,
    queue: Arc<Queue>,
}

/// Completion handle of the background writer
pub struct WriterHandle {
    task: JoinHandle<usize>,
}

impl QueuedStore {
    /// Start the writer. Must run inside a tokio runtime.
    pub fn spawn(inner: SharedStore) -> (Self, WriterHandle) {
        let queue = Arc::new(Queue::default());
        let task = tokio::spawn(write_loop(inner.clone(), Arc::clone(&queue)));

        (Self { inner, queue }, WriterHandle { task })
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.queue.lock().map(|p| p.writes.len()).unwrap_or(0)
    }
}

impl Drop for QueuedStore {
    fn drop(&mut self) {
        self.queue.close();
    }
}

async fn write_loop(target: SharedStore, queue: Arc<Queue>) -> usize {
    let mut failures = 0usize;

    loop {
        let (batch, closed) = match queue.take() {
            Ok(taken) => taken,
            Err(e) => {
                tracing::warn!(error = %e, "Write queue unusable, stopping writer");
                return failures + 1;
            }
        };

        if !batch.is_empty() {
            let target = Arc::clone(&target);
            failures += tokio::task::spawn_blocking(move || apply(&target, batch))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Queued write batch panicked");
                    1
                });
        } else if closed {
            return failures;
        } else {
            queue.notify.notified().await;
        }
    }
}

fn apply(target: &SharedStore, batch: Vec<(String, Option<Vec<u8>>)>) -> usize {
    let mut failures = 0usize;
    for (key, value) in batch {
        let result = match &value {
            Some(bytes) => target.set(&key, bytes),
            None => target.remove(&key),
        };
        if let Err(e) = result {
            failures += 1;
            let op = if value.is_some() { "set" } else { "remove" };
            tracing::warn!(error = %e, op, key = %key, "Queued write failed");
        }
    }
    failures
}

impl KeyValueStore for QueuedStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.queue.push(key, Some(value.to_vec()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.queue.push(key, None)
    }
}

impl WriterHandle {
    /// Wait until every queued write has been applied. Resolves once all
    /// `QueuedStore` handles are dropped; returns the number of failed writes.
    pub async fn flush(self) -> Result<usize> {
        self.task
            .await
            .map_err(|e| RecorderError::Other(format!("writer task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts writes reaching the wrapped store
    struct CountingStore {
        inner: MemoryStore,
        sets: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_latest_write_wins() {
        let memory = Arc::new(MemoryStore::new());
        let (queued, writer) = QueuedStore::spawn(memory.clone());

        queued.set("k", b"1").unwrap();
        queued.set("k", b"2").unwrap();
        queued.remove("gone").unwrap();
        queued.set("k", b"3").unwrap();
        drop(queued);

        assert_eq!(writer.flush().await.unwrap(), 0);
        assert_eq!(memory.get("k").unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_remove_after_set_wins() {
        let memory = Arc::new(MemoryStore::new());
        let (queued, writer) = QueuedStore::spawn(memory.clone());

        queued.set("current-run-state", b"{}").unwrap();
        queued.remove("current-run-state").unwrap();
        drop(queued);

        writer.flush().await.unwrap();
        assert!(!memory.contains("current-run-state"));
    }

    #[tokio::test]
    async fn test_backlog_collapses_per_key() {
        let counting = Arc::new(CountingStore {
            inner: MemoryStore::new(),
            sets: AtomicUsize::new(0),
        });
        let (queued, writer) = QueuedStore::spawn(counting.clone());

        // The writer cannot run until this task yields
        for i in 0..1000 {
            queued
                .set("current-run-state", format!("{}", i).as_bytes())
                .unwrap();
        }
        queued.set("activities", b"[]").unwrap();
        assert_eq!(queued.pending_len(), 2);
        drop(queued);

        assert_eq!(writer.flush().await.unwrap(), 0);
        assert_eq!(counting.sets.load(Ordering::SeqCst), 2);
        assert_eq!(
            counting.get("current-run-state").unwrap(),
            Some(b"999".to_vec())
        );
    }

    #[tokio::test]
    async fn test_writes_after_writer_caught_up() {
        let memory = Arc::new(MemoryStore::new());
        let (queued, writer) = QueuedStore::spawn(memory.clone());

        queued.set("k", b"first").unwrap();
        while memory.get("k").unwrap().is_none() {
            tokio::task::yield_now().await;
        }
        queued.set("k", b"second").unwrap();
        drop(queued);

        writer.flush().await.unwrap();
        assert_eq!(memory.get("k").unwrap(), Some(b"second".to_vec()));
    }
}
