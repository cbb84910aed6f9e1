use std::env;

use crate::error::ConfigError;
use crate::gateway::GatewayConfig;
use crate::worker::WorkerConfig;

/// Process-level configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Shared secret the webhook sender signs with. Required.
    pub webhook_secret: String,
    pub redis_url: String,
    pub notifier_url: Option<String>,
    pub notifier_key: Option<String>,
    /// When set, the notifier simulates success without contacting
    /// the real provider.
    pub notifier_dry_run: bool,
    pub gateway: GatewayConfig,
    pub worker: WorkerConfig,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_secret = env::var("WEBHOOK_SECRET")
            .map_err(|_| ConfigError::MissingVar("WEBHOOK_SECRET"))?;

        Ok(Self {
            webhook_secret,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            notifier_url: env::var("NOTIFIER_URL").ok(),
            notifier_key: env::var("NOTIFIER_KEY").ok(),
            notifier_dry_run: env::var("NOTIFIER_DRY_RUN")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            gateway: GatewayConfig::default(),
            worker: WorkerConfig::default(),
        })
    }
}
