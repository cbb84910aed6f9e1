use async_trait::async_trait;

use crate::error::NotifyError;
use crate::types::unix_now_ms;

/// Provider acknowledgement for one delivered notification.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// External push-delivery collaborator invoked by the worker.
/// Success/failure only; no further contract assumed.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        order_id: &str,
    ) -> Result<DeliveryReceipt, NotifyError>;
}

/// Simulates provider success without contacting anything.
///
/// Used when the dry-run flag is set, and in tests.
#[derive(Default)]
pub struct DryRunNotifier;

impl DryRunNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushNotifier for DryRunNotifier {
    async fn notify(
        &self,
        user_id: &str,
        order_id: &str,
    ) -> Result<DeliveryReceipt, NotifyError> {
        tracing::info!(user_id, order_id, "dry run, would send order notification");
        Ok(DeliveryReceipt {
            message_id: format!("dry-run-{}", unix_now_ms()),
        })
    }
}

/// Push delivery over a generic HTTP provider endpoint.
#[cfg(feature = "http")]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    key: Option<String>,
    timeout: std::time::Duration,
}

#[cfg(feature = "http")]
impl HttpNotifier {
    pub fn new(url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            key,
            timeout: std::time::Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl PushNotifier for HttpNotifier {
    async fn notify(
        &self,
        user_id: &str,
        order_id: &str,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let body = serde_json::json!({
            "notification": {
                "title": "New Order",
                "body": format!("Order {order_id} placed by {user_id}"),
            },
            "data": {
                "orderId": order_id,
                "userId": user_id,
                "type": "order.created",
            },
        });

        let mut request = self.client.post(&self.url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    NotifyError("provider request timed out".to_string())
                } else {
                    NotifyError(format!("provider unreachable: {err}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let message_id = response.text().await.unwrap_or_default();
            Ok(DeliveryReceipt { message_id })
        } else {
            Err(NotifyError(format!("provider returned {status}")))
        }
    }
}
