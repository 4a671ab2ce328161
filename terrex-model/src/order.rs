use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{error::ModelError, ids::OrderId, status::OrderStatus};

/// Where an order came from. Imported orders mirror their lifecycle back to
/// the upstream archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OrderSource {
    SelfService,
    Imported,
}

impl OrderSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderSource::SelfService => "self_service",
            OrderSource::Imported => "imported",
        }
    }
}

impl fmt::Display for OrderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSource {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self_service" => Ok(OrderSource::SelfService),
            "imported" => Ok(OrderSource::Imported),
            other => Err(ModelError::UnknownSource(other.to_string())),
        }
    }
}

/// Resolved request configuration: requested outputs keyed by input short
/// name (or sensor family for imported orders).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ProductOptions {
    pub outputs: BTreeMap<String, Vec<String>>,
}

impl ProductOptions {
    pub fn with_outputs<I, S>(key: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut opts = Self::default();
        opts.insert(key, outputs);
        opts
    }

    pub fn insert<I, S>(&mut self, key: impl Into<String>, outputs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs
            .insert(key.into(), outputs.into_iter().map(Into::into).collect());
    }

    pub fn outputs_for(&self, key: &str) -> &[String] {
        self.outputs.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One customer or imported request owning one or more scenes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Order {
    pub id: OrderId,
    /// Human-readable business key.
    pub orderid: String,
    pub requester: String,
    pub email: String,
    pub status: OrderStatus,
    pub order_source: OrderSource,
    pub order_date: DateTime<Utc>,
    pub completion_date: Option<DateTime<Utc>>,
    pub initial_email_sent: Option<DateTime<Utc>>,
    pub completion_email_sent: Option<DateTime<Utc>>,
    /// Upstream archive order id, set only for imported orders.
    pub ee_order_id: Option<String>,
    pub product_opts: ProductOptions,
    pub note: Option<String>,
}

impl Order {
    pub fn is_imported(&self) -> bool {
        self.order_source == OrderSource::Imported
    }

    /// Business key for a self-service order placed at `at`.
    pub fn generate_key(requester: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{:03}",
            requester,
            at.format("%m%d%Y-%H%M%S"),
            at.timestamp_subsec_millis()
        )
    }

    /// Business key for an order imported from the upstream archive.
    pub fn imported_key(email: &str, ee_order_id: &str) -> String {
        format!("{email}-{ee_order_id}")
    }
}

/// Insert payload for a new order row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub orderid: String,
    pub requester: String,
    pub email: String,
    pub order_source: OrderSource,
    pub order_date: DateTime<Utc>,
    pub ee_order_id: Option<String>,
    pub product_opts: ProductOptions,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn self_service_key_embeds_requester_and_timestamp() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::milliseconds(42);
        assert_eq!(
            Order::generate_key("someone@example.com", at),
            "someone@example.com-03092024-140507-042"
        );
    }

    #[test]
    fn imported_key_uses_upstream_id() {
        assert_eq!(
            Order::imported_key("a@b.org", "0101703"),
            "a@b.org-0101703"
        );
    }

    #[test]
    fn product_options_lookup() {
        let opts = ProductOptions::with_outputs("tm5", ["sr", "toa"]);
        assert_eq!(opts.outputs_for("tm5"), ["sr", "toa"]);
        assert!(opts.outputs_for("olitirs8").is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn product_options_serialize_as_plain_map() {
        let opts = ProductOptions::with_outputs("mod09a1", ["l1"]);
        let json = serde_json::to_string(&opts).expect("serialize");
        assert_eq!(json, r#"{"mod09a1":["l1"]}"#);
    }
}
