//! JSON-over-HTTP clients for the catalog and the archive ordering service.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use terrex_model::{ProductOptions, SensorFamily, UpstreamUnitStatus};
use tracing::debug;
use url::Url;

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    ports::{
        ImportedOrder, ImportedUnit, InventoryOracle, OrderingService, UnitStatus,
        UnitStatusReport,
    },
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: Client,
    base: Url,
    service: ExternalService,
}

impl JsonEndpoint {
    fn new(base_url: &str, timeout: Duration, service: ExternalService) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            OrchestratorError::Configuration(format!("invalid {service} url {base_url:?}: {e}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            OrchestratorError::Configuration(format!("failed to build {service} client: {e}"))
        })?;
        Ok(Self {
            client,
            base,
            service,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| {
            OrchestratorError::Configuration(format!("invalid {} path {path:?}: {e}", self.service))
        })
    }

    fn transport(&self, err: reqwest::Error) -> OrchestratorError {
        OrchestratorError::unreachable(self.service, err.to_string())
    }

    /// Server errors and throttling are transient; other client errors are
    /// authoritative refusals.
    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("{status}: {}", body.trim());
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(OrchestratorError::unreachable(self.service, message))
        } else {
            Err(OrchestratorError::UpstreamRejected(message))
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| self.transport(e))
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| self.transport(e))
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self
            .client
            .put(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AvailabilityRequest<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    available: HashMap<String, bool>,
}

/// Catalog lookup at `POST {base}/{sensor}/availability`.
#[derive(Debug, Clone)]
pub struct HttpInventoryOracle {
    endpoint: JsonEndpoint,
}

impl HttpInventoryOracle {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, timeout, ExternalService::Inventory)?,
        })
    }
}

#[async_trait]
impl InventoryOracle for HttpInventoryOracle {
    async fn check_availability(
        &self,
        sensor: SensorFamily,
        ids: &[String],
    ) -> Result<HashMap<String, bool>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let response: AvailabilityResponse = self
            .endpoint
            .post(&format!("{sensor}/availability"), &AvailabilityRequest { ids })
            .await?;
        debug!(%sensor, requested = ids.len(), answered = response.available.len(), "inventory answered");
        Ok(response.available)
    }
}

#[derive(Debug, Serialize)]
struct PlaceOrderRequest<'a> {
    units: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireUnitStatus {
    Ordered,
    Available,
    Rejected,
}

#[derive(Debug, Deserialize)]
struct WireUnit {
    unit_id: String,
    status: WireUnitStatus,
}

#[derive(Debug, Serialize)]
struct PushStatusRequest {
    status: char,
}

#[derive(Debug, Deserialize)]
struct WireImportedUnit {
    unit_id: String,
    name: String,
    sensor: SensorFamily,
    #[serde(default)]
    restricted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireImportedOrder {
    order_id: String,
    email: String,
    requester: String,
    order_date: DateTime<Utc>,
    #[serde(default)]
    product_opts: ProductOptions,
    units: Vec<WireImportedUnit>,
}

impl From<WireImportedOrder> for ImportedOrder {
    fn from(wire: WireImportedOrder) -> Self {
        ImportedOrder {
            ee_order_id: wire.order_id,
            email: wire.email,
            requester: wire.requester,
            order_date: wire.order_date,
            product_opts: wire.product_opts,
            units: wire
                .units
                .into_iter()
                .map(|unit| ImportedUnit {
                    unit_id: unit.unit_id,
                    name: unit.name,
                    sensor: unit.sensor,
                    restricted: unit.restricted,
                })
                .collect(),
        }
    }
}

/// Archive ordering client.
///
/// - `POST {base}/orders` places units and returns the batch id
/// - `GET {base}/orders/{batch}/units` polls unit states
/// - `PUT {base}/orders/{order}/units/{unit}` pushes a unit status
/// - `GET {base}/imports` lists orders waiting to be imported
#[derive(Debug, Clone)]
pub struct HttpOrderingService {
    endpoint: JsonEndpoint,
}

impl HttpOrderingService {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, timeout, ExternalService::Ordering)?,
        })
    }
}

#[async_trait]
impl OrderingService for HttpOrderingService {
    async fn place_order(&self, scene_names: &[String]) -> Result<String> {
        let response: PlaceOrderResponse = self
            .endpoint
            .post("orders", &PlaceOrderRequest { units: scene_names })
            .await?;
        Ok(response.order_id)
    }

    async fn poll_status(&self, batch_id: &str) -> Result<Vec<UnitStatus>> {
        let units: Vec<WireUnit> = self
            .endpoint
            .get(&format!("orders/{batch_id}/units"))
            .await?;
        Ok(units
            .into_iter()
            .map(|unit| UnitStatus {
                unit_id: unit.unit_id,
                status: match unit.status {
                    WireUnitStatus::Ordered => UnitStatusReport::Ordered,
                    WireUnitStatus::Available => UnitStatusReport::Available,
                    WireUnitStatus::Rejected => UnitStatusReport::Rejected,
                },
            })
            .collect())
    }

    async fn push_unit_status(
        &self,
        ee_order_id: &str,
        unit_id: &str,
        status: UpstreamUnitStatus,
    ) -> Result<()> {
        self.endpoint
            .put(
                &format!("orders/{ee_order_id}/units/{unit_id}"),
                &PushStatusRequest {
                    status: status.as_char(),
                },
            )
            .await
    }

    async fn fetch_imported_orders(&self) -> Result<Vec<ImportedOrder>> {
        let orders: Vec<WireImportedOrder> = self.endpoint.get("imports").await?;
        Ok(orders.into_iter().map(ImportedOrder::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_its_path() {
        let endpoint = JsonEndpoint::new(
            "https://archive.example.org/api/v1",
            DEFAULT_TIMEOUT,
            ExternalService::Ordering,
        )
        .expect("endpoint");
        assert_eq!(
            endpoint.url("orders/17/units").expect("url").as_str(),
            "https://archive.example.org/api/v1/orders/17/units"
        );
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        let err = HttpInventoryOracle::new("not a url").expect_err("invalid");
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn imported_orders_decode() {
        let wire: Vec<WireImportedOrder> = serde_json::from_str(
            r#"[{"order_id":"0101703","email":"a@b.org","requester":"a",
                "order_date":"2024-03-09T14:05:07Z",
                "units":[{"unit_id":"1","name":"LC08_X","sensor":"landsat"},
                         {"unit_id":"2","name":"LC08_Y","sensor":"landsat","restricted":"embargoed"}]}]"#,
        )
        .expect("decode");
        let order = ImportedOrder::from(wire.into_iter().next().expect("one order"));
        assert_eq!(order.ee_order_id, "0101703");
        assert_eq!(order.units[1].restricted.as_deref(), Some("embargoed"));
    }
}
