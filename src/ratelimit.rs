use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BackendError;
use crate::types::{unix_now_ms, RateDecision};

/// Fixed-window request counter per client identity.
///
/// The window is fixed, not sliding: a burst straddling the boundary
/// may admit up to twice the limit. The limit and window are
/// configuration, not constants.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(
        &self,
        client_key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<RateDecision, BackendError>;
}

/// In-memory fixed-window limiter.
#[derive(Default)]
pub struct FixedWindowLimiter {
    windows: Mutex<HashMap<String, WindowSlot>>,
}

struct WindowSlot {
    count: u32,
    expires_at_ms: u64,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) window slot count.
    pub async fn tracked_clients(&self) -> usize {
        let windows = self.windows.lock().await;
        windows.len()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn allow(
        &self,
        client_key: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<RateDecision, BackendError> {
        let now = unix_now_ms();
        let mut windows = self.windows.lock().await;
        // Expired slots are swept here so the map does not grow per
        // distinct client key; a swept key restarts with a fresh window.
        windows.retain(|_, slot| slot.expires_at_ms > now);

        let slot = windows.entry(client_key.to_string()).or_insert(WindowSlot {
            count: 0,
            expires_at_ms: now + window_secs * 1_000,
        });
        slot.count += 1;

        Ok(RateDecision {
            allowed: slot.count <= limit,
            remaining: limit.saturating_sub(slot.count),
        })
    }
}
