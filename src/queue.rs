use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout_at;

use crate::error::BackendError;
use crate::types::{DeadLetterEntry, QueueMessage};

/// Monotonically-ordered identifier assigned on append.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Claim everything already on the stream.
    Beginning,
    /// Claim only messages appended after group creation.
    End,
}

/// Append-only log with named streams, consumer groups, blocking reads,
/// acknowledgement, and a sibling dead-letter stream per topic.
///
/// The worker always acknowledges what it dequeued; retries travel as
/// fresh appends with an incremented retry count, so an acked id is
/// never redelivered.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Append a message; returns its ordered identifier.
    async fn append(
        &self,
        stream: &str,
        message: &QueueMessage,
    ) -> Result<MessageId, BackendError>;

    /// Idempotent group creation. Creating a group that already exists
    /// is not an error.
    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BackendError>;

    /// Claim up to `count` entries never delivered to this group,
    /// blocking up to `block_ms` if none are available. Empty on timeout.
    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(MessageId, QueueMessage)>, BackendError>;

    /// Remove an entry from the group's pending set. Acked ids are
    /// never redelivered.
    async fn ack(
        &self,
        stream: &str,
        group: &str,
        id: &MessageId,
    ) -> Result<(), BackendError>;

    /// Park an entry on the sibling `<stream>-dlq` stream.
    async fn dead_letter(
        &self,
        stream: &str,
        entry: &DeadLetterEntry,
    ) -> Result<MessageId, BackendError>;

    /// Current entry count, used as the queue-depth gauge.
    async fn len(&self, stream: &str) -> Result<u64, BackendError>;

    /// Health probe for the backing service.
    async fn ping(&self) -> bool;
}

/// Name of the sibling dead-letter stream for a topic.
pub fn dead_letter_stream(stream: &str) -> String {
    format!("{stream}-dlq")
}

/// In-memory queue with full stream/group semantics, for tests and
/// backend-free deployments.
#[derive(Default)]
pub struct InMemoryQueue {
    streams: Mutex<HashMap<String, StreamState>>,
    dead_letters: Mutex<HashMap<String, Vec<DeadLetterEntry>>>,
    notify: Notify,
}

#[derive(Default)]
struct StreamState {
    messages: Vec<(u64, QueueMessage)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    /// First sequence number not yet delivered to this group.
    cursor: u64,
    /// Delivered but unacknowledged sequence numbers.
    pending: HashSet<u64>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a dead-letter stream, by its full `<stream>-dlq` name.
    pub async fn dead_letter_entries(&self, dlq_stream: &str) -> Vec<DeadLetterEntry> {
        let dead_letters = self.dead_letters.lock().await;
        dead_letters.get(dlq_stream).cloned().unwrap_or_default()
    }

    /// Pending (delivered, unacked) entry count for a group.
    pub async fn pending_len(&self, stream: &str, group: &str) -> usize {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn append(
        &self,
        stream: &str,
        message: &QueueMessage,
    ) -> Result<MessageId, BackendError> {
        let seq = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.messages.push((seq, message.clone()));
            seq
        };
        self.notify.notify_waiters();
        Ok(MessageId(seq.to_string()))
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BackendError> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        let cursor = match start {
            GroupStart::Beginning => 0,
            GroupStart::End => state.next_seq + 1,
        };
        state.groups.entry(group.to_string()).or_insert(GroupState {
            cursor,
            pending: HashSet::new(),
        });
        Ok(())
    }

    async fn read(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(MessageId, QueueMessage)>, BackendError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(block_ms);

        loop {
            // Register for wakeups before checking, so an append between
            // the check and the wait is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut streams = self.streams.lock().await;
                let state = streams.entry(stream.to_string()).or_default();
                let StreamState { messages, groups, .. } = state;
                let group_state = groups.get_mut(group).ok_or_else(|| {
                    BackendError(format!("no consumer group '{group}' on stream '{stream}'"))
                })?;

                let mut claimed = Vec::new();
                for (seq, message) in messages.iter() {
                    if *seq >= group_state.cursor {
                        claimed.push((*seq, message.clone()));
                        if claimed.len() == count {
                            break;
                        }
                    }
                }

                if let Some(&(last, _)) = claimed.last() {
                    group_state.cursor = last + 1;
                    for (seq, _) in &claimed {
                        group_state.pending.insert(*seq);
                    }
                    return Ok(claimed
                        .into_iter()
                        .map(|(seq, message)| (MessageId(seq.to_string()), message))
                        .collect());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(
        &self,
        stream: &str,
        group: &str,
        id: &MessageId,
    ) -> Result<(), BackendError> {
        let Ok(seq) = id.0.parse::<u64>() else {
            return Ok(());
        };
        let mut streams = self.streams.lock().await;
        if let Some(group_state) = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_state.pending.remove(&seq);
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        stream: &str,
        entry: &DeadLetterEntry,
    ) -> Result<MessageId, BackendError> {
        let mut dead_letters = self.dead_letters.lock().await;
        let entries = dead_letters.entry(dead_letter_stream(stream)).or_default();
        entries.push(entry.clone());
        Ok(MessageId(entries.len().to_string()))
    }

    async fn len(&self, stream: &str) -> Result<u64, BackendError> {
        let streams = self.streams.lock().await;
        if let Some(state) = streams.get(stream) {
            return Ok(state.messages.len() as u64);
        }
        drop(streams);
        let dead_letters = self.dead_letters.lock().await;
        Ok(dead_letters.get(stream).map(|e| e.len()).unwrap_or(0) as u64)
    }

    async fn ping(&self) -> bool {
        true
    }
}
