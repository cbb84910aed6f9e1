use serde::{Deserialize, Serialize};

/// Caller-supplied external event identifier (e.g. `evt_123`).
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of external event ids with other string identifiers. Global
/// uniqueness is enforced by the idempotency layer, not by storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

/// Opaque internal identifier for an [`EventRecord`], generated at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

/// Lifecycle status of an accepted event.
///
/// Transitions are driven only by the worker, except the replay reset:
/// `Queued -> Processing -> { Sent | Queued (retry) | Failed }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Queued,
    Processing,
    Sent,
    Failed,
}

/// Durable representation of one accepted notification.
///
/// Created by the ingress gateway on first acceptance of an external
/// event id; mutated only by the worker and the replay operation.
/// `processed_at_secs` and `failed_at_secs` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: RecordId,
    pub event_id: EventId,
    pub event_type: String,
    pub user_id: String,
    pub order_id: String,
    pub amount: i64,
    pub status: EventStatus,
    pub retry_count: u32,
    /// Full original payload, stored verbatim.
    pub payload: serde_json::Value,
    pub created_at_secs: u64,
    pub updated_at_secs: u64,
    /// Set only on successful delivery.
    pub processed_at_secs: Option<u64>,
    /// Set only when moved to dead-letter.
    pub failed_at_secs: Option<u64>,
    /// Set on failure, cleared on replay.
    pub error_message: Option<String>,
}

/// Typed shape of the raw webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: OrderData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderData {
    pub order_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub amount: i64,
}

/// Unit of work carried on the durable queue.
///
/// Not an owner of the [`EventRecord`]; a transient work item correlated
/// to the record by external event id. One record may see several
/// messages over its lifetime (original + retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub event_id: EventId,
    /// Serialized payload, re-parsed by the worker.
    pub payload: String,
    pub enqueued_at_ms: u64,
    pub retry_count: u32,
}

/// Message parked on the dead-letter stream after the retry budget
/// is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub event_id: EventId,
    pub payload: String,
    pub error: String,
    pub failed_at_ms: u64,
    pub retry_count: u32,
}

/// Point-in-time view of the pipeline counters.
///
/// `stale` is set when any value came from the in-process fallback
/// because the backing counter store was unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub deduped: u64,
    pub sent: u64,
    pub failed: u64,
    pub dlq: u64,
    pub queue_size: u64,
    pub stale: bool,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
}

pub(crate) fn unix_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
