//! Merges scraped observations into the stored price rows.
//!
//! A row is created on the first observation, rewritten only when the price
//! changes, and left untouched otherwise. On a change the superseded
//! (last_updated, price) pair is appended to the row's history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::CatalogStore;
use crate::models::{Observation, Price};
use crate::utils::error::AppError;
use crate::Result;

/// Attempts per observation when another writer updates the same row.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
    /// The observation names a product or retailer the catalog does not know.
    Rejected,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    catalog: Arc<dyn CatalogStore>,
}

impl Reconciler {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    pub async fn reconcile(&self, observation: &Observation) -> Result<ReconcileOutcome> {
        self.reconcile_at(observation, Utc::now()).await
    }

    pub async fn reconcile_at(&self, observation: &Observation, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        if !self
            .catalog
            .identity_known(observation.product_id, observation.retailer_id)
            .await?
        {
            warn!(
                product_id = observation.product_id,
                retailer_id = observation.retailer_id,
                "Rejected observation for unknown product or retailer"
            );
            return Ok(ReconcileOutcome::Rejected);
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let existing = self
                .catalog
                .get_price(observation.product_id, observation.retailer_id)
                .await?;

            let (next, expected, outcome) = match existing {
                None => (Price::from_observation(observation, now), None, ReconcileOutcome::Created),
                Some(current) if current.price_differs(observation) => (
                    current.superseded_by(observation, now),
                    Some(current.last_updated),
                    ReconcileOutcome::Updated,
                ),
                Some(_) => {
                    debug!(
                        product_id = observation.product_id,
                        retailer_id = observation.retailer_id,
                        "Price unchanged"
                    );
                    return Ok(ReconcileOutcome::Unchanged);
                }
            };

            if self.catalog.upsert_price(&next, expected).await? {
                debug!(
                    product_id = observation.product_id,
                    retailer_id = observation.retailer_id,
                    price = ?observation.price,
                    outcome = outcome.as_str(),
                    "Reconciled observation"
                );
                return Ok(outcome);
            }

            debug!(
                product_id = observation.product_id,
                retailer_id = observation.retailer_id,
                attempt,
                "Price row changed concurrently, retrying"
            );
        }

        Err(AppError::Internal(format!(
            "price for product {} at retailer {} kept changing concurrently, gave up after {} attempts",
            observation.product_id, observation.retailer_id, MAX_WRITE_ATTEMPTS
        )))
    }
}
