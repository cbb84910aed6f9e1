use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AdmitError, BackendError, ReplayError};
use crate::idempotency::IdempotencyStore;
use crate::metrics::MetricsRegistry;
use crate::queue::DurableQueue;
use crate::ratelimit::RateLimiter;
use crate::signing::{is_timestamp_fresh, verify_signature};
use crate::store::{EventPatch, EventStore, NewEvent};
use crate::types::{
    unix_now_ms, unix_now_secs, EventId, EventStatus, QueueMessage, RecordId, WebhookPayload,
};

/// Tunables for the admission pipeline.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Stream the accepted events are appended to.
    pub stream: String,
    pub rate_limit: u32,
    pub rate_window_secs: u64,
    pub freshness_window_secs: u64,
    pub idempotency_ttl_secs: u64,
    /// Soft completion budget; exceeding it logs a warning only.
    pub latency_budget_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            stream: "orders-stream".to_string(),
            rate_limit: 10,
            rate_window_secs: 10,
            freshness_window_secs: 300,
            idempotency_ttl_secs: 86_400,
            latency_budget_ms: 300,
        }
    }
}

/// Non-error outcome of admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Event accepted, recorded, and enqueued.
    Accepted(EventId),
    /// Already admitted earlier; ignored without side effects.
    Duplicate(EventId),
}

impl Admission {
    pub fn event_id(&self) -> &EventId {
        match self {
            Admission::Accepted(id) | Admission::Duplicate(id) => id,
        }
    }
}

/// Orchestrates the admission pipeline for inbound notifications.
///
/// All collaborators are injected so tests can substitute in-memory
/// fakes; the gateway itself holds no mutable state.
pub struct IngressGateway {
    secret: Vec<u8>,
    config: GatewayConfig,
    limiter: Arc<dyn RateLimiter>,
    idempotency: Arc<dyn IdempotencyStore>,
    store: Arc<dyn EventStore>,
    queue: Arc<dyn DurableQueue>,
    metrics: Arc<MetricsRegistry>,
}

impl IngressGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        secret: impl Into<Vec<u8>>,
        config: GatewayConfig,
        limiter: Arc<dyn RateLimiter>,
        idempotency: Arc<dyn IdempotencyStore>,
        store: Arc<dyn EventStore>,
        queue: Arc<dyn DurableQueue>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            secret: secret.into(),
            config,
            limiter,
            idempotency,
            store,
            queue,
            metrics,
        }
    }

    /// Run the admission pipeline for one inbound request.
    ///
    /// Each step is a hard gate; the first failure short-circuits.
    /// Side effects committed before a later failure are not rolled
    /// back: a retry of the same event id is deduped instead.
    pub async fn admit(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        timestamp: Option<&str>,
        client_key: &str,
    ) -> Result<Admission, AdmitError> {
        let started = Instant::now();

        let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
            return Err(AdmitError::MissingHeaders);
        };

        let decision = self
            .limiter
            .allow(client_key, self.config.rate_limit, self.config.rate_window_secs)
            .await?;
        if !decision.allowed {
            return Err(AdmitError::RateLimited {
                retry_after_secs: self.config.rate_window_secs,
            });
        }

        if !is_timestamp_fresh(timestamp, unix_now_secs(), self.config.freshness_window_secs) {
            return Err(AdmitError::StaleTimestamp);
        }

        if !verify_signature(signature, raw_body, &self.secret) {
            return Err(AdmitError::InvalidSignature);
        }

        let payload: WebhookPayload =
            serde_json::from_slice(raw_body).map_err(|_| AdmitError::MalformedPayload)?;
        let event_id = EventId(payload.event_id.clone());

        // Mark before any further side effect so a racing duplicate
        // fails closed rather than double-processing.
        let first_sighting = self
            .idempotency
            .check_and_set(&event_id, self.config.idempotency_ttl_secs)
            .await?;
        if !first_sighting {
            self.metrics.incr_deduped().await;
            tracing::info!(event_id = %event_id.0, "duplicate event ignored");
            return Ok(Admission::Duplicate(event_id));
        }

        let record = self
            .store
            .create(NewEvent {
                event_id: event_id.clone(),
                event_type: payload.event_type.clone(),
                user_id: payload.data.user_id.clone(),
                order_id: payload.data.order_id.clone(),
                amount: payload.data.amount,
                status: EventStatus::Queued,
                retry_count: 0,
                payload: serde_json::to_value(&payload)
                    .map_err(|err| BackendError(err.to_string()))?,
            })
            .await?;

        let message = QueueMessage {
            event_id: event_id.clone(),
            payload: serde_json::to_string(&payload)
                .map_err(|err| BackendError(err.to_string()))?,
            enqueued_at_ms: unix_now_ms(),
            retry_count: 0,
        };
        self.queue.append(&self.config.stream, &message).await?;

        self.metrics.incr_received().await;

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(self.config.latency_budget_ms) {
            tracing::warn!(
                event_id = %event_id.0,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.config.latency_budget_ms,
                "admission exceeded latency budget"
            );
        } else {
            tracing::debug!(
                event_id = %event_id.0,
                record_id = %record.id.0,
                elapsed_ms = elapsed.as_millis() as u64,
                "webhook admitted"
            );
        }

        Ok(Admission::Accepted(event_id))
    }

    /// Re-enqueue a dead-lettered record.
    ///
    /// Only records in the failed state are replayable; the reset clears
    /// error state and retry count, then appends a fresh retry-0 message.
    /// A second replay of the same record fails because its status is no
    /// longer failed.
    pub async fn replay(&self, record_id: &RecordId) -> Result<(), ReplayError> {
        let record = self.store.get(record_id).await?;
        let Some(record) = record else {
            return Err(ReplayError::NotFound);
        };
        if record.status != EventStatus::Failed {
            return Err(ReplayError::NotReplayable);
        }

        self.store
            .update(
                record_id,
                EventPatch {
                    status: Some(EventStatus::Queued),
                    retry_count: Some(0),
                    clear_error: true,
                    clear_failed_at: true,
                    ..Default::default()
                },
            )
            .await?;

        let message = QueueMessage {
            event_id: record.event_id.clone(),
            payload: record.payload.to_string(),
            enqueued_at_ms: unix_now_ms(),
            retry_count: 0,
        };
        self.queue.append(&self.config.stream, &message).await?;

        tracing::info!(
            record_id = %record_id.0,
            event_id = %record.event_id.0,
            "event replayed"
        );
        Ok(())
    }

    /// Config view for callers wiring the transport layer.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
