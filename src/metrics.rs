use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BackendError;
use crate::queue::DurableQueue;
use crate::types::MetricsSnapshot;

/// Monotonic named counters backed by a shared service.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn incr(&self, name: &str) -> Result<u64, BackendError>;
    async fn get(&self, name: &str) -> Result<u64, BackendError>;
}

/// In-memory counter store.
#[derive(Default)]
pub struct InMemoryCounters {
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounters {
    async fn incr(&self, name: &str) -> Result<u64, BackendError> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get(&self, name: &str) -> Result<u64, BackendError> {
        let counters = self.counters.lock().await;
        Ok(counters.get(name).copied().unwrap_or(0))
    }
}

const RECEIVED: &str = "received";
const DEDUPED: &str = "deduped";
const SENT: &str = "sent";
const FAILED: &str = "failed";
const DLQ: &str = "dlq";

/// Single authoritative metrics interface for the pipeline.
///
/// One backing [`CounterStore`] holds the durable values; in-process
/// shadow counters absorb increments while the store is unavailable,
/// and a snapshot assembled from shadows is flagged `stale`.
pub struct MetricsRegistry {
    backing: Arc<dyn CounterStore>,
    fallback: Fallback,
}

#[derive(Default)]
struct Fallback {
    received: AtomicU64,
    deduped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dlq: AtomicU64,
}

impl MetricsRegistry {
    pub fn new(backing: Arc<dyn CounterStore>) -> Self {
        Self {
            backing,
            fallback: Fallback::default(),
        }
    }

    pub async fn incr_received(&self) {
        self.incr(RECEIVED, &self.fallback.received).await;
    }

    pub async fn incr_deduped(&self) {
        self.incr(DEDUPED, &self.fallback.deduped).await;
    }

    pub async fn incr_sent(&self) {
        self.incr(SENT, &self.fallback.sent).await;
    }

    pub async fn incr_failed(&self) {
        self.incr(FAILED, &self.fallback.failed).await;
    }

    pub async fn incr_dlq(&self) {
        self.incr(DLQ, &self.fallback.dlq).await;
    }

    async fn incr(&self, name: &str, shadow: &AtomicU64) {
        if let Err(err) = self.backing.incr(name).await {
            shadow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(counter = name, error = %err, "counter store unavailable, using in-process fallback");
        }
    }

    /// Assemble the counter snapshot plus the queue-depth gauge.
    ///
    /// Backend unavailability degrades to best-effort partial results
    /// rather than failing the whole snapshot.
    pub async fn snapshot(&self, queue: &dyn DurableQueue, stream: &str) -> MetricsSnapshot {
        let mut stale = false;

        let mut resolve = |result: Result<u64, BackendError>, shadow: &AtomicU64| match result {
            Ok(value) => value + shadow.load(Ordering::Relaxed),
            Err(_) => {
                stale = true;
                shadow.load(Ordering::Relaxed)
            }
        };

        let received = resolve(self.backing.get(RECEIVED).await, &self.fallback.received);
        let deduped = resolve(self.backing.get(DEDUPED).await, &self.fallback.deduped);
        let sent = resolve(self.backing.get(SENT).await, &self.fallback.sent);
        let failed = resolve(self.backing.get(FAILED).await, &self.fallback.failed);
        let dlq = resolve(self.backing.get(DLQ).await, &self.fallback.dlq);

        let queue_size = match queue.len(stream).await {
            Ok(len) => len,
            Err(_) => {
                stale = true;
                0
            }
        };

        MetricsSnapshot {
            received,
            deduped,
            sent,
            failed,
            dlq,
            queue_size,
            stale,
        }
    }
}
