use std::fmt;

use async_trait::async_trait;
use terrex_model::CacheCapacity;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct PurgedOrder {
    pub orderid: String,
    pub scenes: u64,
}

/// Order lifecycle milestones delivered to customers and operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    OrderReceived {
        orderid: String,
        email: String,
    },
    OrderComplete {
        orderid: String,
        email: String,
    },
    OrderCancelled {
        orderid: String,
        email: String,
    },
    PurgeReport {
        before: CacheCapacity,
        after: CacheCapacity,
        orders: Vec<PurgedOrder>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::OrderReceived { .. } => "order_received",
            Notification::OrderComplete { .. } => "order_complete",
            Notification::OrderCancelled { .. } => "order_cancelled",
            Notification::PurgeReport { .. } => "purge_report",
        }
    }

    pub fn orderid(&self) -> Option<&str> {
        match self {
            Notification::OrderReceived { orderid, .. }
            | Notification::OrderComplete { orderid, .. }
            | Notification::OrderCancelled { orderid, .. } => Some(orderid),
            Notification::PurgeReport { .. } => None,
        }
    }
}

/// Fire-and-forget delivery. Idempotency is owned by the caller through the
/// order's sent flags.
#[async_trait]
pub trait NotificationSink: Send + Sync + fmt::Debug {
    async fn send(&self, notification: &Notification) -> Result<()>;
}
