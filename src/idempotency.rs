use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BackendError;
use crate::types::{unix_now_ms, EventId};

/// TTL-bounded "seen before?" marks for external event ids.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns `true` iff this event id has not been admitted before,
    /// marking it in the same step so a racing duplicate fails closed.
    async fn check_and_set(
        &self,
        event_id: &EventId,
        ttl_secs: u64,
    ) -> Result<bool, BackendError>;
}

/// In-memory idempotency marks; expired marks are swept on access.
#[derive(Default)]
pub struct InMemoryIdempotency {
    marks: Mutex<HashMap<String, u64>>,
}

impl InMemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) mark count.
    pub async fn tracked_marks(&self) -> usize {
        let marks = self.marks.lock().await;
        marks.len()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotency {
    async fn check_and_set(
        &self,
        event_id: &EventId,
        ttl_secs: u64,
    ) -> Result<bool, BackendError> {
        let now = unix_now_ms();
        let mut marks = self.marks.lock().await;
        // Sweep so the map does not grow per distinct event id.
        marks.retain(|_, &mut expires_at_ms| expires_at_ms > now);

        if marks.contains_key(&event_id.0) {
            return Ok(false);
        }
        marks.insert(event_id.0.clone(), now + ttl_secs * 1_000);
        Ok(true)
    }
}
