//! Write-back queue: decouples the latency-sensitive matching path from
//! batched vector-index persistence.
//!
//! A single shared FIFO. Draining is guarded by a flag so timer-triggered
//! and size-triggered flushes cannot overlap. When the index is offline a
//! flush re-queues its batch at the front and retries after a fixed delay
//! rather than dropping data.

use crate::config::WriteBackConfig;
use crate::index::{VectorIndex, VectorRecord};
use crate::models::WriteBackRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed(usize),
    Empty,
    /// Another flush is draining; this one did nothing.
    Busy,
    /// The index was unreachable; the batch is back at the front.
    Offline,
}

pub struct WriteBackQueue {
    index: Arc<dyn VectorIndex>,
    cfg: WriteBackConfig,
    queue: Mutex<VecDeque<WriteBackRecord>>,
    draining: AtomicBool,
}

impl WriteBackQueue {
    pub fn new(index: Arc<dyn VectorIndex>, cfg: WriteBackConfig) -> Self {
        Self {
            index,
            cfg,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    /// Enqueues one emission. A pending entry for the same id is replaced
    /// (full replacement, last write wins). Crossing the length trigger
    /// starts an early flush.
    pub async fn enqueue(&self, record: WriteBackRecord) {
        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.retain(|r| r.id != record.id);
            queue.push_back(record);
            queue.len() >= self.cfg.trigger_len
        };
        if should_flush {
            self.flush().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn flush(&self) -> FlushOutcome {
        if self.draining.swap(true, Ordering::SeqCst) {
            return FlushOutcome::Busy;
        }
        let outcome = self.flush_batch().await;
        self.draining.store(false, Ordering::SeqCst);
        outcome
    }

    async fn flush_batch(&self) -> FlushOutcome {
        let batch: Vec<WriteBackRecord> = {
            let mut queue = self.queue.lock().await;
            let take = queue.len().min(self.cfg.max_batch);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let records: Vec<VectorRecord> = batch.iter().map(to_vector_record).collect();
        match self.index.upsert_files(records).await {
            Ok(report) => {
                debug!(
                    written = report.written,
                    skipped = report.skipped.len(),
                    "write-back flush complete"
                );
                FlushOutcome::Flushed(report.written)
            }
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "index offline, re-queuing write-back batch");
                let mut queue = self.queue.lock().await;
                for record in batch.into_iter().rev() {
                    queue.push_front(record);
                }
                FlushOutcome::Offline
            }
        }
    }

    /// Timer-triggered drain loop. Backs off to the retry delay after an
    /// offline flush instead of the regular interval.
    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let delay = match queue.flush().await {
                    FlushOutcome::Offline => Duration::from_secs(queue.cfg.retry_delay_secs),
                    _ => Duration::from_secs(queue.cfg.flush_interval_secs),
                };
                tokio::time::sleep(delay).await;
            }
        })
    }
}

fn to_vector_record(record: &WriteBackRecord) -> VectorRecord {
    let mut meta = match &record.meta {
        serde_json::Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            if !other.is_null() {
                map.insert("meta".to_string(), other.clone());
            }
            map
        }
    };
    meta.insert("model".to_string(), serde_json::json!(record.model));
    meta.insert("updatedAt".to_string(), serde_json::json!(record.updated_at));
    VectorRecord {
        id: record.id.clone(),
        vector: record.vector.clone(),
        meta: serde_json::Value::Object(meta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;

    fn record(id: &str) -> WriteBackRecord {
        WriteBackRecord {
            id: id.to_string(),
            vector: vec![1.0, 0.0],
            model: "fixture".to_string(),
            meta: serde_json::json!({"path": format!("/tmp/{id}")}),
            updated_at: 1_700_000_000,
        }
    }

    fn queue_with(index: Arc<MemoryIndex>, trigger_len: usize) -> WriteBackQueue {
        WriteBackQueue::new(
            index,
            WriteBackConfig {
                max_batch: 8,
                trigger_len,
                flush_interval_secs: 60,
                retry_delay_secs: 1,
            },
        )
    }

    #[tokio::test]
    async fn flush_writes_to_the_index() {
        let index = Arc::new(MemoryIndex::new());
        let queue = queue_with(index.clone(), 100);
        queue.enqueue(record("a")).await;
        queue.enqueue(record("b")).await;
        assert_eq!(queue.flush().await, FlushOutcome::Flushed(2));
        assert_eq!(index.file_count().await, 2);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn same_id_is_replaced_last_write_wins() {
        let index = Arc::new(MemoryIndex::new());
        let queue = queue_with(index, 100);
        queue.enqueue(record("a")).await;
        let mut newer = record("a");
        newer.updated_at = 1_800_000_000;
        queue.enqueue(newer).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn size_trigger_flushes_early() {
        let index = Arc::new(MemoryIndex::new());
        let queue = queue_with(index.clone(), 2);
        queue.enqueue(record("a")).await;
        assert_eq!(index.file_count().await, 0);
        queue.enqueue(record("b")).await;
        assert_eq!(index.file_count().await, 2);
    }

    #[tokio::test]
    async fn offline_flush_requeues_at_the_front() {
        let index = Arc::new(MemoryIndex::new());
        let queue = queue_with(index.clone(), 100);
        queue.enqueue(record("a")).await;
        queue.enqueue(record("b")).await;

        index.set_offline(true);
        assert_eq!(queue.flush().await, FlushOutcome::Offline);
        assert_eq!(queue.len().await, 2);

        index.set_offline(false);
        assert_eq!(queue.flush().await, FlushOutcome::Flushed(2));
        assert_eq!(index.file_count().await, 2);
    }

    #[tokio::test]
    async fn empty_queue_flush_is_a_noop() {
        let index = Arc::new(MemoryIndex::new());
        let queue = queue_with(index, 100);
        assert_eq!(queue.flush().await, FlushOutcome::Empty);
    }
}
