use serde::{Deserialize, Serialize};
use terrex_model::{NewOrder, NewScene, Order, OrderSource, ProductOptions, SensorFamily};
use tracing::info;

use crate::{
    error::Result, orchestration::orchestrator::ProductionOrchestrator,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedScene {
    pub name: String,
    pub sensor: SensorFamily,
}

/// An already validated self-service order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub requester: String,
    pub email: String,
    pub scenes: Vec<RequestedScene>,
    #[serde(default)]
    pub product_opts: ProductOptions,
    /// Adds the order-level plotting and statistics product.
    #[serde(default)]
    pub plot: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl ProductionOrchestrator {
    /// Persist a new self-service order with every scene `submitted`.
    pub async fn submit_order(&self, request: NewOrderRequest) -> Result<Order> {
        let now = self.now();
        let limit = self.config.retry.default_retry_limit;

        let mut scenes: Vec<NewScene> = request
            .scenes
            .iter()
            .map(|scene| NewScene::submitted(scene.name.clone(), scene.sensor, limit))
            .collect();
        if request.plot {
            scenes.push(NewScene::plot(limit));
        }

        let order = NewOrder {
            orderid: Order::generate_key(&request.requester, now),
            requester: request.requester,
            email: request.email,
            order_source: OrderSource::SelfService,
            order_date: now,
            ee_order_id: None,
            product_opts: request.product_opts,
            note: request.note,
        };

        let order = self.store.create_order(order, scenes, now).await?;
        info!(order = %order.orderid, requester = %order.requester, "order placed");
        Ok(order)
    }
}
