#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::streams::{StreamReadOptions, StreamReadReply};
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[cfg(feature = "redis")]
use crate::error::BackendError;
#[cfg(feature = "redis")]
use crate::idempotency::IdempotencyStore;
#[cfg(feature = "redis")]
use crate::metrics::CounterStore;
#[cfg(feature = "redis")]
use crate::queue::{dead_letter_stream, DurableQueue, GroupStart, MessageId};
#[cfg(feature = "redis")]
use crate::ratelimit::RateLimiter;
#[cfg(feature = "redis")]
use crate::types::{DeadLetterEntry, EventId, QueueMessage, RateDecision};

/// One Redis connection target serving every shared concern: the
/// stream queue, idempotency marks, rate counters, and metrics.
#[cfg(feature = "redis")]
pub struct RedisBackend {
    client: redis::Client,
}

#[cfg(feature = "redis")]
impl RedisBackend {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn from_url(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::Connection, BackendError> {
        self.client.get_tokio_connection().await.map_err(backend_err)
    }
}

#[cfg(feature = "redis")]
fn backend_err(err: redis::RedisError) -> BackendError {
    BackendError(err.to_string())
}

#[cfg(feature = "redis")]
fn field_str(map: &std::collections::HashMap<String, redis::Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl DurableQueue for RedisBackend {
    async fn append(
        &self,
        stream: &str,
        message: &QueueMessage,
    ) -> Result<MessageId, BackendError> {
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd(
                stream,
                "*",
                &[
                    ("event_id", message.event_id.0.as_str()),
                    ("payload", message.payload.as_str()),
                    ("enqueued_at_ms", &message.enqueued_at_ms.to_string()),
                    ("retry_count", &message.retry_count.to_string()),
                ],
            )
            .await
            .map_err(backend_err)?;
        Ok(MessageId(id))
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BackendError> {
        let start_id = match start {
            GroupStart::Beginning => "0",
            GroupStart::End => "$",
        };
        let mut conn = self.conn().await?;
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, start_id).await;
        match created {
            Ok(()) => Ok(()),
            // Group already exists.
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(MessageId, QueueMessage)>, BackendError> {
        let mut conn = self.conn().await?;
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(backend_err)?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let Some(event_id) = field_str(&entry.map, "event_id") else {
                    tracing::warn!(id = %entry.id, "stream entry missing event_id, skipping");
                    continue;
                };
                let message = QueueMessage {
                    event_id: EventId(event_id),
                    payload: field_str(&entry.map, "payload").unwrap_or_default(),
                    enqueued_at_ms: field_str(&entry.map, "enqueued_at_ms")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    retry_count: field_str(&entry.map, "retry_count")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                };
                messages.push((MessageId(entry.id), message));
            }
        }
        Ok(messages)
    }

    async fn ack(
        &self,
        stream: &str,
        group: &str,
        id: &MessageId,
    ) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(stream, group, &[id.0.as_str()])
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        stream: &str,
        entry: &DeadLetterEntry,
    ) -> Result<MessageId, BackendError> {
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd(
                dead_letter_stream(stream),
                "*",
                &[
                    ("event_id", entry.event_id.0.as_str()),
                    ("payload", entry.payload.as_str()),
                    ("error", entry.error.as_str()),
                    ("failed_at_ms", &entry.failed_at_ms.to_string()),
                    ("retry_count", &entry.retry_count.to_string()),
                ],
            )
            .await
            .map_err(backend_err)?;
        Ok(MessageId(id))
    }

    async fn len(&self, stream: &str) -> Result<u64, BackendError> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(stream).await.map_err(backend_err)?;
        Ok(len)
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.conn().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl IdempotencyStore for RedisBackend {
    async fn check_and_set(
        &self,
        event_id: &EventId,
        ttl_secs: u64,
    ) -> Result<bool, BackendError> {
        let key = format!("idempotency:{}", event_id.0);
        let mut conn = self.conn().await?;
        // SET NX EX: the mark and the check are one atomic step.
        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(set.is_some())
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl RateLimiter for RedisBackend {
    async fn allow(
        &self,
        client_key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<RateDecision, BackendError> {
        let key = format!("rate_limit:{client_key}");
        let mut conn = self.conn().await?;
        let count: u32 = conn.incr(&key, 1).await.map_err(backend_err)?;
        if count == 1 {
            let _: bool = conn
                .expire(&key, window_secs as usize)
                .await
                .map_err(backend_err)?;
        }
        Ok(RateDecision {
            allowed: count <= limit,
            remaining: limit.saturating_sub(count),
        })
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl CounterStore for RedisBackend {
    async fn incr(&self, name: &str) -> Result<u64, BackendError> {
        let mut conn = self.conn().await?;
        conn.incr(format!("metrics:{name}"), 1)
            .await
            .map_err(backend_err)
    }

    async fn get(&self, name: &str) -> Result<u64, BackendError> {
        let mut conn = self.conn().await?;
        let value: Option<u64> = conn
            .get(format!("metrics:{name}"))
            .await
            .map_err(backend_err)?;
        Ok(value.unwrap_or(0))
    }
}
