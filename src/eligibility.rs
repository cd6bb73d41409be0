//! Decides which (product, retailer) pairs are due for a re-scrape.
//!
//! A product belongs to exactly one tier, derived from its release year and
//! the current year. It is due when it has never been priced at the retailer
//! or its price is older than the tier's interval.

use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::{CatalogStore, DueQuery, TierFilter};
use crate::models::{Retailer, ScrapeUnit, Tier};
use crate::utils::error::AppError;
use crate::Result;

#[derive(Clone)]
pub struct EligibilitySelector {
    catalog: Arc<dyn CatalogStore>,
}

impl EligibilitySelector {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Units due for `tier` at `retailer` right now, in catalog order.
    pub async fn select(&self, retailer: &Retailer, tier: Tier) -> Result<Vec<ScrapeUnit>> {
        self.select_at(retailer, tier, Utc::now()).await
    }

    pub async fn select_at(&self, retailer: &Retailer, tier: Tier, now: DateTime<Utc>) -> Result<Vec<ScrapeUnit>> {
        let query = Self::due_query(retailer, tier, now)?;
        let units = self.catalog.query_due(&query).await?;

        let selected: Vec<ScrapeUnit> = units
            .into_iter()
            .filter(|unit| query.tier_filter.matches(unit.release_year))
            .filter(|unit| match &unit.manufacturer {
                Some(manufacturer) if retailer.excludes_brand(manufacturer) => {
                    warn!(
                        retailer = %retailer.name,
                        product_id = unit.product_id,
                        manufacturer = %manufacturer,
                        "Store returned a product of an excluded brand"
                    );
                    false
                }
                _ => true,
            })
            .collect();

        debug!(
            retailer = %retailer.name,
            tier = %tier,
            due = selected.len(),
            stale_before = %query.stale_before,
            "Selected units"
        );
        Ok(selected)
    }

    pub fn due_query(retailer: &Retailer, tier: Tier, now: DateTime<Utc>) -> Result<DueQuery> {
        let interval = chrono::Duration::from_std(retailer.interval(tier))
            .map_err(|e| AppError::InvalidConfiguration(format!("interval for tier {} out of range: {}", tier, e)))?;
        let stale_before = now
            .checked_sub_signed(interval)
            .ok_or_else(|| AppError::InvalidConfiguration(format!("interval for tier {} out of range", tier)))?;

        Ok(DueQuery {
            retailer_id: retailer.id,
            tier_filter: TierFilter::for_tier(tier, now.year()),
            stale_before,
            excluded_brands: retailer.excluded_brands.clone(),
        })
    }
}
