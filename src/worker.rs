use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::metrics::MetricsRegistry;
use crate::notify::PushNotifier;
use crate::queue::{DurableQueue, GroupStart, MessageId};
use crate::store::{EventPatch, EventStore};
use crate::types::{
    unix_now_ms, unix_now_secs, DeadLetterEntry, EventRecord, EventStatus, QueueMessage,
    WebhookPayload,
};

/// Backoff schedule in milliseconds, keyed by the retry count before
/// incrementing. All attempts past the schedule use the last entry.
pub const RETRY_DELAYS_MS: [u64; 3] = [1_000, 4_000, 10_000];

/// A record moves to dead-letter when its incremented retry count
/// reaches this threshold.
pub const MAX_RETRIES: u32 = 3;

/// Delay before the next redelivery attempt.
pub fn retry_delay(prior_retries: u32) -> Duration {
    let index = (prior_retries as usize).min(RETRY_DELAYS_MS.len() - 1);
    Duration::from_millis(RETRY_DELAYS_MS[index])
}

/// Whether an incremented retry count exhausts the retry budget.
pub fn exceeds_retry_budget(retry_count: u32) -> bool {
    retry_count >= MAX_RETRIES
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    /// Messages claimed per read; each is processed to completion
    /// before the next.
    pub read_count: usize,
    /// Blocking-read bound; the only suspension point besides the
    /// retry delay.
    pub block_ms: u64,
    pub group_start: GroupStart,
    /// Pause after an unexpected loop error before resuming.
    pub error_pause_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream: "orders-stream".to_string(),
            group: "workers".to_string(),
            consumer: "worker-1".to_string(),
            read_count: 1,
            block_ms: 1_000,
            group_start: GroupStart::End,
            error_pause_ms: 5_000,
        }
    }
}

/// Long-running consumer loop driving the retry/dead-letter state machine.
///
/// The worker always acknowledges the message it dequeued, on success
/// and failure alike, so a poison message cannot block the group.
/// Retries travel as fresh appends with an incremented retry count; the
/// event record, not the log, is the durable source of retry truth.
pub struct Worker {
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn EventStore>,
    notifier: Arc<dyn PushNotifier>,
    metrics: Arc<MetricsRegistry>,
    config: WorkerConfig,
    running: AtomicBool,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn PushNotifier>,
        metrics: Arc<MetricsRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            notifier,
            metrics,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Request cooperative shutdown. The loop halts after the message
    /// currently being processed is acknowledged; scheduled retry
    /// timers are not guaranteed to fire afterwards.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the consumer loop until [`Worker::stop`] is called.
    ///
    /// Delivery errors never crash the loop; unexpected read errors are
    /// logged, followed by a short pause before resuming.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "starting event worker"
        );

        let mut group_ready = false;
        while self.running.load(Ordering::SeqCst) {
            if !group_ready {
                match self
                    .queue
                    .ensure_group(&self.config.stream, &self.config.group, self.config.group_start)
                    .await
                {
                    Ok(()) => group_ready = true,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to ensure consumer group");
                        sleep(Duration::from_millis(self.config.error_pause_ms)).await;
                        continue;
                    }
                }
            }

            match self
                .queue
                .read(
                    &self.config.stream,
                    &self.config.group,
                    &self.config.consumer,
                    self.config.read_count,
                    self.config.block_ms,
                )
                .await
            {
                Ok(batch) => {
                    for (message_id, message) in batch {
                        self.process_message(&message_id, &message).await;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "worker read error");
                    sleep(Duration::from_millis(self.config.error_pause_ms)).await;
                }
            }
        }

        tracing::info!("event worker stopped");
    }

    async fn process_message(&self, message_id: &MessageId, message: &QueueMessage) {
        let record = match self.store.get_by_event_id(&message.event_id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                // Non-fatal anomaly: record never created or already gone.
                tracing::warn!(
                    event_id = %message.event_id.0,
                    "no record for queued message, dropping"
                );
                None
            }
            Err(err) => {
                // Transient store failure. The message goes back on the
                // stream before the claim is released, otherwise the
                // event would be lost under the always-ack protocol.
                tracing::error!(
                    event_id = %message.event_id.0,
                    error = %err,
                    "record lookup failed, re-enqueueing message"
                );
                match self.queue.append(&self.config.stream, message).await {
                    Ok(_) => self.ack_message(message_id).await,
                    Err(err) => {
                        // Claim left pending for inspection.
                        tracing::warn!(
                            event_id = %message.event_id.0,
                            error = %err,
                            "failed to re-enqueue after lookup error"
                        );
                    }
                }
                sleep(Duration::from_millis(self.config.error_pause_ms)).await;
                return;
            }
        };

        if let Some(record) = record {
            if let Err(error) = self.deliver(&record, message).await {
                // Retry count comes from the message, not the record.
                self.handle_failure(&record, message.retry_count, &error).await;
            }
        }

        // A poison message must not block the group.
        self.ack_message(message_id).await;
    }

    async fn ack_message(&self, message_id: &MessageId) {
        if let Err(err) = self
            .queue
            .ack(&self.config.stream, &self.config.group, message_id)
            .await
        {
            tracing::warn!(error = %err, "failed to acknowledge message");
        }
    }

    async fn deliver(&self, record: &EventRecord, message: &QueueMessage) -> Result<(), String> {
        self.store
            .update(
                &record.id,
                EventPatch {
                    status: Some(EventStatus::Processing),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| err.to_string())?;

        let payload: WebhookPayload = serde_json::from_str(&message.payload)
            .map_err(|err| format!("invalid message payload: {err}"))?;

        let receipt = self
            .notifier
            .notify(&payload.data.user_id, &payload.data.order_id)
            .await
            .map_err(|err| err.to_string())?;

        self.store
            .update(
                &record.id,
                EventPatch {
                    status: Some(EventStatus::Sent),
                    processed_at_secs: Some(unix_now_secs()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| err.to_string())?;

        self.metrics.incr_sent().await;
        tracing::info!(
            event_id = %record.event_id.0,
            message_id = %receipt.message_id,
            "event delivered"
        );
        Ok(())
    }

    async fn handle_failure(&self, record: &EventRecord, prior_retries: u32, error: &str) {
        let new_retry_count = prior_retries + 1;

        if exceeds_retry_budget(new_retry_count) {
            let entry = DeadLetterEntry {
                event_id: record.event_id.clone(),
                payload: record.payload.to_string(),
                error: error.to_string(),
                failed_at_ms: unix_now_ms(),
                retry_count: new_retry_count,
            };
            if let Err(err) = self.queue.dead_letter(&self.config.stream, &entry).await {
                tracing::warn!(error = %err, "failed to park message in dead-letter stream");
            }

            if let Err(err) = self
                .store
                .update(
                    &record.id,
                    EventPatch {
                        status: Some(EventStatus::Failed),
                        retry_count: Some(new_retry_count),
                        error_message: Some(error.to_string()),
                        failed_at_secs: Some(unix_now_secs()),
                        ..Default::default()
                    },
                )
                .await
            {
                tracing::warn!(error = %err, "failed to mark record as failed");
            }

            self.metrics.incr_failed().await;
            self.metrics.incr_dlq().await;
            tracing::warn!(
                event_id = %record.event_id.0,
                retries = new_retry_count,
                "event moved to dead-letter stream"
            );
        } else {
            let delay = retry_delay(prior_retries);
            tracing::info!(
                event_id = %record.event_id.0,
                attempt = new_retry_count,
                delay_ms = delay.as_millis() as u64,
                "scheduling redelivery"
            );

            // The record is updated immediately so dashboards see the
            // pending retry; the re-append rides an in-memory timer and
            // is lost if the process dies during the delay.
            let queue = Arc::clone(&self.queue);
            let stream = self.config.stream.clone();
            let retry = QueueMessage {
                event_id: record.event_id.clone(),
                payload: record.payload.to_string(),
                enqueued_at_ms: unix_now_ms(),
                retry_count: new_retry_count,
            };
            tokio::spawn(async move {
                sleep(delay).await;
                if let Err(err) = queue.append(&stream, &retry).await {
                    tracing::warn!(
                        event_id = %retry.event_id.0,
                        error = %err,
                        "failed to re-enqueue retry, attempt dropped"
                    );
                }
            });

            if let Err(err) = self
                .store
                .update(
                    &record.id,
                    EventPatch {
                        status: Some(EventStatus::Queued),
                        retry_count: Some(new_retry_count),
                        error_message: Some(error.to_string()),
                        ..Default::default()
                    },
                )
                .await
            {
                tracing::warn!(error = %err, "failed to record pending retry");
            }
        }
    }
}
