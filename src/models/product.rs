use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    /// Retailer-agnostic catalog key, e.g. the set number printed on the box.
    pub manufacturer_id: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub base_image_url: Option<String>,
    pub description: Option<String>,
    pub piece_count: Option<i64>,
    pub minifigures: Option<i64>,
    pub release_year: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProduct {
    pub manufacturer_id: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub base_image_url: Option<String>,
    pub description: Option<String>,
    pub piece_count: Option<i64>,
    pub minifigures: Option<i64>,
    pub release_year: Option<i32>,
}

/// A (product, retailer) pair selected for one tick, carrying only what a
/// scraper needs to find the product on the retailer's site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeUnit {
    pub product_id: i64,
    pub retailer_id: i64,
    pub manufacturer_id: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub category: Option<String>,
    pub release_year: Option<i32>,
}

impl ScrapeUnit {
    /// Identifier used in logs, falling back to the catalog id.
    pub fn label(&self) -> String {
        match &self.manufacturer_id {
            Some(id) => id.clone(),
            None => format!("product#{}", self.product_id),
        }
    }
}
