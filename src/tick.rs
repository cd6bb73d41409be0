use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::catalog::CatalogStore;
use crate::eligibility::EligibilitySelector;
use crate::harness::{HarnessSettings, ItemFailure, ScrapeHarness};
use crate::models::{Retailer, Tier};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::scrapers::ScraperRegistry;
use crate::session::SessionLauncher;
use crate::utils::error::AppError;
use crate::Result;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TickReport {
    pub retailer_id: i64,
    pub tier: Tier,
    pub selected: usize,
    pub observed: usize,
    pub item_failures: Vec<ItemFailure>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
    /// Observations that could not be written.
    pub failed: usize,
    pub cancelled: bool,
}

impl TickReport {
    fn new(retailer_id: i64, tier: Tier) -> Self {
        Self {
            retailer_id,
            tier,
            selected: 0,
            observed: 0,
            item_failures: Vec::new(),
            created: 0,
            updated: 0,
            unchanged: 0,
            rejected: 0,
            failed: 0,
            cancelled: false,
        }
    }

    fn tally(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created => self.created += 1,
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
            ReconcileOutcome::Rejected => self.rejected += 1,
        }
    }
}

/// One (retailer, tier) refresh: select, scrape, reconcile.
pub struct TickOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    selector: EligibilitySelector,
    harness: ScrapeHarness,
    reconciler: Reconciler,
    registry: ScraperRegistry,
    cancel: watch::Receiver<bool>,
}

impl TickOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        launcher: Arc<dyn SessionLauncher>,
        registry: ScraperRegistry,
        settings: HarnessSettings,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            selector: EligibilitySelector::new(Arc::clone(&catalog)),
            reconciler: Reconciler::new(Arc::clone(&catalog)),
            harness: ScrapeHarness::new(launcher, settings),
            catalog,
            registry,
            cancel,
        }
    }

    pub async fn run_tick(&self, retailer_id: i64, tier: Tier) -> Result<TickReport> {
        let result = self.tick(retailer_id, tier).await;

        let (status, retailer_label) = match &result {
            Ok(report) if report.cancelled => ("cancelled", report.retailer_id.to_string()),
            Ok(report) => ("ok", report.retailer_id.to_string()),
            Err(e) => {
                error!(retailer_id, tier = %tier, error = %e, "Tick failed");
                ("error", retailer_id.to_string())
            }
        };
        metrics::counter!("ticks_total", "retailer" => retailer_label, "tier" => tier.as_str(), "result" => status)
            .increment(1);

        result
    }

    async fn tick(&self, retailer_id: i64, tier: Tier) -> Result<TickReport> {
        // Reloaded every tick so configuration edits apply on the next firing.
        let retailer = self
            .catalog
            .get_retailer(retailer_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("retailer {}", retailer_id)))?;

        let scraper = self
            .registry
            .get(&retailer.name)
            .await
            .ok_or_else(|| AppError::not_found(format!("scraper for retailer '{}'", retailer.name)))?;

        let mut report = TickReport::new(retailer.id, tier);

        let units = self.selector.select(&retailer, tier).await?;
        report.selected = units.len();

        let run = self
            .harness
            .run(scraper.as_ref(), &retailer.scraping_config, &units, &self.cancel)
            .await?;
        report.observed = run.observations.len();
        report.item_failures = run.failures;
        report.cancelled = run.cancelled;

        for observation in &run.observations {
            match self.reconciler.reconcile(observation).await {
                Ok(outcome) => {
                    report.tally(outcome);
                    self.count_outcome(&retailer, outcome.as_str());
                }
                Err(e) => {
                    warn!(
                        retailer = %retailer.name,
                        product_id = observation.product_id,
                        error = %e,
                        "Failed to store observation"
                    );
                    report.failed += 1;
                    self.count_outcome(&retailer, "failed");
                }
            }
        }

        info!(
            retailer = %retailer.name,
            tier = %tier,
            selected = report.selected,
            observed = report.observed,
            item_failures = report.item_failures.len(),
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            rejected = report.rejected,
            failed = report.failed,
            "Tick finished"
        );
        Ok(report)
    }

    fn count_outcome(&self, retailer: &Retailer, outcome: &'static str) {
        metrics::counter!("reconcile_outcomes_total", "retailer" => retailer.name.clone(), "outcome" => outcome)
            .increment(1);
    }
}
