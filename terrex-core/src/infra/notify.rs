use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    ports::{Notification, NotificationSink},
};

fn payload(notification: &Notification) -> Value {
    match notification {
        Notification::OrderReceived { orderid, email }
        | Notification::OrderComplete { orderid, email }
        | Notification::OrderCancelled { orderid, email } => json!({
            "kind": notification.kind(),
            "orderid": orderid,
            "to": email,
        }),
        Notification::PurgeReport {
            before,
            after,
            orders,
        } => json!({
            "kind": notification.kind(),
            "before": before,
            "after": after,
            "orders": orders
                .iter()
                .map(|order| json!({"orderid": order.orderid, "scenes": order.scenes}))
                .collect::<Vec<_>>(),
        }),
    }
}

/// Posts each notification as JSON to a mail relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            OrchestratorError::Configuration(format!("failed to build notifier client: {e}"))
        })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload(notification))
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::unreachable(ExternalService::Notification, e.to_string())
            })?;
        if !response.status().is_success() {
            return Err(OrchestratorError::unreachable(
                ExternalService::Notification,
                format!("relay answered {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            kind = notification.kind(),
            order = notification.orderid().unwrap_or_default(),
            payload = %payload(notification),
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PurgedOrder;
    use terrex_model::CacheCapacity;

    #[test]
    fn purge_report_payload_lists_orders() {
        let value = payload(&Notification::PurgeReport {
            before: CacheCapacity::new(100, 80),
            after: CacheCapacity::new(100, 20),
            orders: vec![PurgedOrder {
                orderid: "o-1".into(),
                scenes: 3,
            }],
        });
        assert_eq!(value["kind"], "purge_report");
        assert_eq!(value["after"]["used"], 20);
        assert_eq!(value["orders"][0]["scenes"], 3);
    }
}
