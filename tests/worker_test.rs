use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use webhook_relay::{
    BackendError, DeliveryReceipt, DurableQueue, EventId, EventPatch, EventRecord, EventStatus,
    EventStore, FixedWindowLimiter, GatewayConfig, GroupStart, InMemoryCounters,
    InMemoryEventStore, InMemoryIdempotency, InMemoryQueue, IngressGateway, MetricsRegistry,
    NewEvent, NotifyError, PushNotifier, QueueMessage, RecordId, Worker, WorkerConfig,
};

const STREAM: &str = "orders-stream";
const DLQ_STREAM: &str = "orders-stream-dlq";

/// Fails the first `fails_remaining` deliveries, then succeeds.
struct FlakyNotifier {
    fails_remaining: AtomicU32,
    calls: AtomicU32,
}

impl FlakyNotifier {
    fn failing_first(n: u32) -> Arc<Self> {
        Arc::new(Self {
            fails_remaining: AtomicU32::new(n),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn succeed_from_now_on(&self) {
        self.fails_remaining.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl PushNotifier for FlakyNotifier {
    async fn notify(
        &self,
        _user_id: &str,
        _order_id: &str,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fails_remaining.load(Ordering::SeqCst) > 0 {
            self.fails_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(NotifyError("provider unavailable".to_string()));
        }
        Ok(DeliveryReceipt {
            message_id: format!("msg-{call}"),
        })
    }
}

/// Delegates to an in-memory store, failing the first
/// `lookup_failures` lookups by event id.
struct FlakyStore {
    inner: InMemoryEventStore,
    lookup_failures: AtomicU32,
}

impl FlakyStore {
    fn failing_lookups(n: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryEventStore::new(),
            lookup_failures: AtomicU32::new(n),
        })
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn create(&self, event: NewEvent) -> Result<EventRecord, BackendError> {
        self.inner.create(event).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<EventRecord>, BackendError> {
        self.inner.get(id).await
    }

    async fn get_by_event_id(
        &self,
        event_id: &EventId,
    ) -> Result<Option<EventRecord>, BackendError> {
        if self.lookup_failures.load(Ordering::SeqCst) > 0 {
            self.lookup_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(BackendError("connection reset".to_string()));
        }
        self.inner.get_by_event_id(event_id).await
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: EventPatch,
    ) -> Result<Option<EventRecord>, BackendError> {
        self.inner.update(id, patch).await
    }

    async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<EventStatus>,
    ) -> Result<Vec<EventRecord>, BackendError> {
        self.inner.list(limit, offset, status).await
    }

    async fn search(&self, fragment: &str) -> Result<Vec<EventRecord>, BackendError> {
        self.inner.search(fragment).await
    }
}

struct Rig {
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryEventStore>,
    metrics: Arc<MetricsRegistry>,
    notifier: Arc<FlakyNotifier>,
    worker: Arc<Worker>,
}

fn rig(failures: u32) -> Rig {
    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryEventStore::new());
    let metrics = Arc::new(MetricsRegistry::new(Arc::new(InMemoryCounters::new())));
    let notifier = FlakyNotifier::failing_first(failures);
    let worker = Arc::new(Worker::new(
        queue.clone(),
        store.clone(),
        notifier.clone(),
        metrics.clone(),
        WorkerConfig {
            group_start: GroupStart::Beginning,
            block_ms: 100,
            ..Default::default()
        },
    ));
    Rig { queue, store, metrics, notifier, worker }
}

fn spawn_worker(rig: &Rig) -> tokio::task::JoinHandle<()> {
    let worker = Arc::clone(&rig.worker);
    tokio::spawn(async move { worker.run().await })
}

fn order_payload(event_id: &str) -> serde_json::Value {
    serde_json::json!({
        "event_id": event_id,
        "type": "order.created",
        "data": { "order_id": "o1", "userId": "u1", "amount": 2999 },
    })
}

async fn seed_event(rig: &Rig, event_id: &str) -> RecordId {
    let payload = order_payload(event_id);
    let record = rig
        .store
        .create(NewEvent {
            event_id: EventId(event_id.to_string()),
            event_type: "order.created".to_string(),
            user_id: "u1".to_string(),
            order_id: "o1".to_string(),
            amount: 2999,
            status: EventStatus::Queued,
            retry_count: 0,
            payload: payload.clone(),
        })
        .await
        .unwrap();
    rig.queue
        .append(
            STREAM,
            &QueueMessage {
                event_id: EventId(event_id.to_string()),
                payload: payload.to_string(),
                enqueued_at_ms: 0,
                retry_count: 0,
            },
        )
        .await
        .unwrap();
    record.id
}

async fn wait_for_status(rig: &Rig, id: &RecordId, status: EventStatus) {
    for _ in 0..300 {
        let record = rig.store.get(id).await.unwrap().unwrap();
        if record.status == status {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("record never reached {status:?}");
}

async fn shutdown(rig: &Rig, handle: tokio::task::JoinHandle<()>) {
    rig.worker.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_marks_record_sent() {
    let rig = rig(0);
    let id = seed_event(&rig, "evt_ok").await;
    let handle = spawn_worker(&rig);

    wait_for_status(&rig, &id, EventStatus::Sent).await;
    shutdown(&rig, handle).await;

    let record = rig.store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.retry_count, 0);
    assert!(record.processed_at_secs.is_some());
    assert!(record.failed_at_secs.is_none());
    assert!(record.error_message.is_none());
    assert_eq!(rig.notifier.calls(), 1);

    let snapshot = rig.metrics.snapshot(rig.queue.as_ref(), STREAM).await;
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.dlq, 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_failure_retries_then_delivers() {
    let rig = rig(1);
    let id = seed_event(&rig, "evt_flaky").await;
    let handle = spawn_worker(&rig);

    wait_for_status(&rig, &id, EventStatus::Sent).await;
    shutdown(&rig, handle).await;

    let record = rig.store.get(&id).await.unwrap().unwrap();
    // The retry count survives the eventual success.
    assert_eq!(record.retry_count, 1);
    assert!(record.processed_at_secs.is_some());
    assert!(record.failed_at_secs.is_none());
    assert_eq!(rig.notifier.calls(), 2);

    assert!(rig.queue.dead_letter_entries(DLQ_STREAM).await.is_empty());
    let snapshot = rig.metrics.snapshot(rig.queue.as_ref(), STREAM).await;
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.dlq, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_dead_letter_the_event() {
    let rig = rig(u32::MAX);
    let id = seed_event(&rig, "evt_doomed").await;
    let handle = spawn_worker(&rig);

    wait_for_status(&rig, &id, EventStatus::Failed).await;
    shutdown(&rig, handle).await;

    let record = rig.store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.retry_count, 3);
    assert!(record.failed_at_secs.is_some());
    assert_eq!(record.error_message.as_deref(), Some("delivery failed: provider unavailable"));
    assert!(record.processed_at_secs.is_none());
    // Original attempt plus two redeliveries.
    assert_eq!(rig.notifier.calls(), 3);

    let parked = rig.queue.dead_letter_entries(DLQ_STREAM).await;
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].event_id.0, "evt_doomed");
    assert_eq!(parked[0].retry_count, 3);

    let snapshot = rig.metrics.snapshot(rig.queue.as_ref(), STREAM).await;
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.dlq, 1);
    assert_eq!(snapshot.sent, 0);

    // Everything the worker dequeued was acknowledged.
    assert_eq!(rig.queue.pending_len(STREAM, "workers").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_message_without_record_is_dropped_and_acked() {
    let rig = rig(0);
    rig.queue
        .append(
            STREAM,
            &QueueMessage {
                event_id: EventId("evt_orphan".to_string()),
                payload: order_payload("evt_orphan").to_string(),
                enqueued_at_ms: 0,
                retry_count: 0,
            },
        )
        .await
        .unwrap();
    let handle = spawn_worker(&rig);

    // Give the worker time to claim, drop, and acknowledge the orphan.
    sleep(Duration::from_secs(2)).await;
    shutdown(&rig, handle).await;

    assert_eq!(rig.notifier.calls(), 0);
    assert_eq!(rig.queue.pending_len(STREAM, "workers").await, 0);
    assert!(rig.queue.dead_letter_entries(DLQ_STREAM).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_lookup_error_requeues_the_message() {
    let queue = Arc::new(InMemoryQueue::new());
    let store = FlakyStore::failing_lookups(1);
    let metrics = Arc::new(MetricsRegistry::new(Arc::new(InMemoryCounters::new())));
    let notifier = FlakyNotifier::failing_first(0);
    let worker = Arc::new(Worker::new(
        queue.clone(),
        store.clone(),
        notifier.clone(),
        metrics.clone(),
        WorkerConfig {
            group_start: GroupStart::Beginning,
            block_ms: 100,
            ..Default::default()
        },
    ));

    let payload = order_payload("evt_blip");
    let record = store
        .create(NewEvent {
            event_id: EventId("evt_blip".to_string()),
            event_type: "order.created".to_string(),
            user_id: "u1".to_string(),
            order_id: "o1".to_string(),
            amount: 2999,
            status: EventStatus::Queued,
            retry_count: 0,
            payload: payload.clone(),
        })
        .await
        .unwrap();
    queue
        .append(
            STREAM,
            &QueueMessage {
                event_id: EventId("evt_blip".to_string()),
                payload: payload.to_string(),
                enqueued_at_ms: 0,
                retry_count: 0,
            },
        )
        .await
        .unwrap();

    let handle = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run().await }
    });

    // The first claim hits the store blip and is re-enqueued; the
    // second claim delivers.
    for _ in 0..300 {
        if store.get(&record.id).await.unwrap().unwrap().status == EventStatus::Sent {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    worker.stop();
    handle.await.unwrap();

    let after = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(after.status, EventStatus::Sent);
    assert_eq!(after.retry_count, 0);
    assert_eq!(notifier.calls(), 1);
    assert_eq!(queue.pending_len(STREAM, "workers").await, 0);
    assert!(queue.dead_letter_entries(DLQ_STREAM).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_replayed_event_is_delivered_once_provider_recovers() {
    let rig = rig(u32::MAX);
    let gateway = IngressGateway::new(
        b"test-secret-key".as_slice(),
        GatewayConfig::default(),
        Arc::new(FixedWindowLimiter::new()),
        Arc::new(InMemoryIdempotency::new()),
        rig.store.clone(),
        rig.queue.clone(),
        rig.metrics.clone(),
    );

    let id = seed_event(&rig, "evt_replay").await;
    let handle = spawn_worker(&rig);
    wait_for_status(&rig, &id, EventStatus::Failed).await;

    rig.notifier.succeed_from_now_on();
    gateway.replay(&id).await.unwrap();

    wait_for_status(&rig, &id, EventStatus::Sent).await;
    shutdown(&rig, handle).await;

    let record = rig.store.get(&id).await.unwrap().unwrap();
    // Replay resets the retry count; the fresh attempt succeeds on the
    // first try.
    assert_eq!(record.retry_count, 0);
    assert!(record.processed_at_secs.is_some());
    assert!(record.failed_at_secs.is_none());
    assert!(record.error_message.is_none());
    assert_eq!(rig.notifier.calls(), 4);
}
