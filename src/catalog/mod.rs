//! Catalog storage: products, retailers and the per-retailer price rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{NewProduct, NewRetailer, Price, Product, Retailer, ScrapeUnit, Tier};
use crate::Result;

pub mod sqlite;

pub use sqlite::SqliteCatalog;

/// Release-year predicate of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierFilter {
    ReleasedIn(i32),
    /// Anything outside the given years, including an unknown release year.
    NotReleasedIn([i32; 2]),
}

impl TierFilter {
    pub fn for_tier(tier: Tier, current_year: i32) -> Self {
        match tier {
            Tier::CurrentYear => TierFilter::ReleasedIn(current_year),
            Tier::PreviousYear => TierFilter::ReleasedIn(current_year - 1),
            Tier::Older => TierFilter::NotReleasedIn([current_year, current_year - 1]),
        }
    }

    /// Same rule as `Tier::classify`.
    pub fn matches(&self, release_year: Option<i32>) -> bool {
        match *self {
            TierFilter::ReleasedIn(year) => Tier::classify(release_year, year) == Tier::CurrentYear,
            TierFilter::NotReleasedIn([current_year, _]) => Tier::classify(release_year, current_year) == Tier::Older,
        }
    }
}

/// Which products a retailer should re-scrape for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct DueQuery {
    pub retailer_id: i64,
    pub tier_filter: TierFilter,
    /// Price rows updated strictly before this instant are due.
    pub stale_before: DateTime<Utc>,
    pub excluded_brands: Vec<String>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Products matching the query that have no price for the retailer yet,
    /// or whose price is stale. Returned in catalog order.
    async fn query_due(&self, query: &DueQuery) -> Result<Vec<ScrapeUnit>>;

    async fn get_price(&self, product_id: i64, retailer_id: i64) -> Result<Option<Price>>;

    /// Conditional write of a price row. With `expected_last_updated = None`
    /// the row is inserted only if none exists for the key; otherwise the row
    /// is replaced only if its stored `last_updated` still equals the expected
    /// value. Returns `false` when another writer got there first.
    async fn upsert_price(&self, price: &Price, expected_last_updated: Option<DateTime<Utc>>) -> Result<bool>;

    /// Whether both the product and the retailer exist.
    async fn identity_known(&self, product_id: i64, retailer_id: i64) -> Result<bool>;

    async fn get_retailer(&self, id: i64) -> Result<Option<Retailer>>;

    async fn list_retailers(&self) -> Result<Vec<Retailer>>;

    async fn insert_retailer(&self, retailer: &NewRetailer) -> Result<Retailer>;

    async fn insert_product(&self, product: &NewProduct) -> Result<Product>;
}
