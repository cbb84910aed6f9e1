use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::BackendError;
use crate::types::{unix_now_secs, EventId, EventRecord, EventStatus, RecordId};

/// Fields supplied by the gateway when a record is first created.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub user_id: String,
    pub order_id: String,
    pub amount: i64,
    pub status: EventStatus,
    pub retry_count: u32,
    pub payload: serde_json::Value,
}

/// Partial update applied to an [`EventRecord`].
///
/// `updated_at` is always refreshed. The explicit clear flags exist for
/// the replay reset, which nulls error state rather than overwriting it.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub status: Option<EventStatus>,
    pub retry_count: Option<u32>,
    pub processed_at_secs: Option<u64>,
    pub failed_at_secs: Option<u64>,
    pub error_message: Option<String>,
    pub clear_error: bool,
    pub clear_failed_at: bool,
}

/// Event-record persistence, treated as an external collaborator and
/// specified only at this boundary.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create(&self, event: NewEvent) -> Result<EventRecord, BackendError>;

    async fn get(&self, id: &RecordId) -> Result<Option<EventRecord>, BackendError>;

    async fn get_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<EventRecord>, BackendError>;

    /// Apply a patch; returns the updated record, `None` if absent.
    async fn update(
        &self,
        id: &RecordId,
        patch: EventPatch,
    ) -> Result<Option<EventRecord>, BackendError>;

    /// Newest-first listing with optional status filter.
    async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<EventStatus>,
    ) -> Result<Vec<EventRecord>, BackendError>;

    /// Case-insensitive substring search over external event ids.
    async fn search(&self, fragment: &str) -> Result<Vec<EventRecord>, BackendError>;
}

/// In-memory event store for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, (u64, EventRecord)>,
    next_seq: u64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create(&self, event: NewEvent) -> Result<EventRecord, BackendError> {
        let now = unix_now_secs();
        let record = EventRecord {
            id: RecordId(Uuid::new_v4().to_string()),
            event_id: event.event_id,
            event_type: event.event_type,
            user_id: event.user_id,
            order_id: event.order_id,
            amount: event.amount,
            status: event.status,
            retry_count: event.retry_count,
            payload: event.payload,
            created_at_secs: now,
            updated_at_secs: now,
            processed_at_secs: None,
            failed_at_secs: None,
            error_message: None,
        };

        let mut inner = self.inner.lock().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.records.insert(record.id.0.clone(), (seq, record.clone()));
        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<EventRecord>, BackendError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&id.0).map(|(_, record)| record.clone()))
    }

    async fn get_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<EventRecord>, BackendError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .find(|(_, record)| record.event_id == *event_id)
            .map(|(_, record)| record.clone()))
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: EventPatch,
    ) -> Result<Option<EventRecord>, BackendError> {
        let mut inner = self.inner.lock().await;
        let Some((_, record)) = inner.records.get_mut(&id.0) else {
            return Ok(None);
        };

        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(retry_count) = patch.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(processed_at) = patch.processed_at_secs {
            record.processed_at_secs = Some(processed_at);
        }
        if let Some(failed_at) = patch.failed_at_secs {
            record.failed_at_secs = Some(failed_at);
        }
        if let Some(error_message) = patch.error_message {
            record.error_message = Some(error_message);
        }
        if patch.clear_error {
            record.error_message = None;
        }
        if patch.clear_failed_at {
            record.failed_at_secs = None;
        }
        record.updated_at_secs = unix_now_secs();

        Ok(Some(record.clone()))
    }

    async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<EventStatus>,
    ) -> Result<Vec<EventRecord>, BackendError> {
        let inner = self.inner.lock().await;
        let mut all: Vec<_> = inner
            .records
            .values()
            .filter(|(_, record)| status.map_or(true, |s| record.status == s))
            .collect();
        all.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(all
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn search(&self, fragment: &str) -> Result<Vec<EventRecord>, BackendError> {
        let needle = fragment.to_lowercase();
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|(_, record)| record.event_id.0.to_lowercase().contains(&needle))
            .map(|(_, record)| record.clone())
            .collect())
    }
}
