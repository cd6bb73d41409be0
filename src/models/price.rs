use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One superseded value in a price's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub price: Option<f64>,
    pub datetime: DateTime<Utc>,
}

/// The stored offer of one retailer for one product. At most one exists per
/// (product_id, retailer_id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Price {
    pub id: Option<i64>,
    pub product_id: i64,
    pub retailer_id: i64,
    pub price: Option<f64>,
    pub shipping_cost: Option<f64>,
    pub in_stock: Option<bool>,
    pub url: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Values observed before each change, oldest first. Append-only.
    pub price_history: Vec<PricePoint>,
}

/// Result of scraping one unit, before it is merged into the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub product_id: i64,
    pub retailer_id: i64,
    pub price: Option<f64>,
    pub shipping_cost: Option<f64>,
    pub in_stock: Option<bool>,
    pub url: Option<String>,
}

impl Price {
    pub fn from_observation(observation: &Observation, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            product_id: observation.product_id,
            retailer_id: observation.retailer_id,
            price: observation.price,
            shipping_cost: observation.shipping_cost,
            in_stock: observation.in_stock,
            url: observation.url.clone(),
            last_updated: now,
            price_history: Vec::new(),
        }
    }

    pub fn price_differs(&self, observation: &Observation) -> bool {
        self.price != observation.price
    }

    /// Copy of this price with `observation` applied and the superseded value
    /// appended to the history.
    pub fn superseded_by(&self, observation: &Observation, now: DateTime<Utc>) -> Self {
        let mut history = self.price_history.clone();
        history.push(PricePoint {
            price: self.price,
            datetime: self.last_updated,
        });

        Self {
            id: self.id,
            product_id: self.product_id,
            retailer_id: self.retailer_id,
            price: observation.price,
            shipping_cost: observation.shipping_cost,
            in_stock: observation.in_stock,
            url: observation.url.clone(),
            last_updated: now,
            price_history: history,
        }
    }

    /// Full price timeline, oldest first, ending with the current value.
    pub fn timeline(&self) -> Vec<PricePoint> {
        let mut points = self.price_history.clone();
        points.push(PricePoint {
            price: self.price,
            datetime: self.last_updated,
        });
        points
    }
}
