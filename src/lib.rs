//! Signed webhook ingestion with durable queueing and retried delivery.
//!
//! This crate accepts externally-signed webhook notifications, parks
//! them on an append-only stream, and drives each one to an external
//! push notifier with bounded retries and dead-lettering.
//!
//! ## Guarantees
//! - At-least-once delivery for every accepted event
//! - Authenticity (constant-time HMAC) and freshness on the write path
//! - Idempotent admission per external event id
//! - Bounded retries with a fixed backoff schedule, then dead-letter
//! - Survives backend outages: the loop degrades, never crashes
//!
//! ## Non-Guarantees
//! - Exactly-once delivery to the notifier
//! - Ordering across different event ids
//! - Retry timers surviving a process restart
//!
//! All shared services (queue, event store, idempotency marks, rate
//! counters, metrics) are injected trait objects, so the whole pipeline
//! runs against in-memory fakes in tests and against Redis in
//! production (feature `redis`).

mod config;
mod error;
mod gateway;
mod idempotency;
mod metrics;
mod notify;
mod queue;
mod ratelimit;
mod signing;
mod store;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod backend_redis;

pub use config::RelayConfig;
pub use error::{AdmitError, BackendError, ConfigError, NotifyError, ReplayError};
pub use gateway::{Admission, GatewayConfig, IngressGateway};
pub use idempotency::{IdempotencyStore, InMemoryIdempotency};
pub use metrics::{CounterStore, InMemoryCounters, MetricsRegistry};
pub use notify::{DeliveryReceipt, DryRunNotifier, PushNotifier};
pub use queue::{dead_letter_stream, DurableQueue, GroupStart, InMemoryQueue, MessageId};
pub use ratelimit::{FixedWindowLimiter, RateLimiter};
pub use signing::{compute_signature, is_timestamp_fresh, verify_signature};
pub use store::{EventPatch, EventStore, InMemoryEventStore, NewEvent};
pub use types::{
    DeadLetterEntry, EventId, EventRecord, EventStatus, MetricsSnapshot, OrderData,
    QueueMessage, RateDecision, RecordId, WebhookPayload,
};
pub use worker::{
    exceeds_retry_budget, retry_delay, Worker, WorkerConfig, MAX_RETRIES, RETRY_DELAYS_MS,
};

#[cfg(feature = "http")]
pub use notify::HttpNotifier;

#[cfg(feature = "redis")]
pub use backend_redis::RedisBackend;
