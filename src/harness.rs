//! Runs one retailer scraper over a batch of units inside a single session.
//!
//! The session is acquired once per run and closed exactly once on every
//! path after a successful launch. A failing unit is recorded and skipped,
//! it never ends the run.

use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ScraperConfig;
use crate::models::{Observation, RetailerConfig, ScrapeUnit};
use crate::scrapers::{RetailerScraper, ScrapeError};
use crate::session::{ScrapeSession, SessionLauncher, SessionPlan};
use crate::utils::error::AppError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub acquire_timeout: Duration,
    pub item_timeout: Duration,
    pub screenshot_dir: PathBuf,
}

impl HarnessSettings {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            acquire_timeout: config.acquire_timeout(),
            item_timeout: config.item_timeout(),
            screenshot_dir: config.screenshot_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemFailure {
    pub product_id: i64,
    pub manufacturer_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub observations: Vec<Observation>,
    pub failures: Vec<ItemFailure>,
    /// Units scraped without error that produced no observation.
    pub empty: usize,
    /// Set when the run stopped early on a cancellation signal.
    pub cancelled: bool,
}

enum ItemResult {
    Observed(Observation),
    Empty,
    Failed(String),
}

pub struct ScrapeHarness {
    launcher: Arc<dyn SessionLauncher>,
    settings: HarnessSettings,
}

impl ScrapeHarness {
    pub fn new(launcher: Arc<dyn SessionLauncher>, settings: HarnessSettings) -> Self {
        Self { launcher, settings }
    }

    pub async fn run(
        &self,
        scraper: &dyn RetailerScraper,
        config: &RetailerConfig,
        units: &[ScrapeUnit],
        cancel: &watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let plan = SessionPlan::from_config(config)?;

        if units.is_empty() {
            debug!(scraper = %scraper.name(), "Nothing to scrape, session not opened");
            return Ok(RunReport::default());
        }

        let mut session = match timeout(self.settings.acquire_timeout, self.launcher.launch(&plan)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(AppError::Acquisition(e.to_string())),
            Err(_) => {
                return Err(AppError::Acquisition(format!(
                    "session launch timed out after {:?}",
                    self.settings.acquire_timeout
                )));
            }
        };

        let report = self.scrape_units(scraper, &plan, session.as_ref(), units, cancel).await;

        match timeout(self.settings.item_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(scraper = %scraper.name(), error = %e, "Failed to close session"),
            Err(_) => error!(
                scraper = %scraper.name(),
                timeout = ?self.settings.item_timeout,
                "Session close timed out, abandoning it"
            ),
        }

        info!(
            scraper = %scraper.name(),
            method = %plan.method,
            units = units.len(),
            observed = report.observations.len(),
            empty = report.empty,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "Scrape run finished"
        );
        Ok(report)
    }

    async fn scrape_units(
        &self,
        scraper: &dyn RetailerScraper,
        plan: &SessionPlan,
        session: &dyn ScrapeSession,
        units: &[ScrapeUnit],
        cancel: &watch::Receiver<bool>,
    ) -> RunReport {
        let mut report = RunReport::default();

        for (index, unit) in units.iter().enumerate() {
            if *cancel.borrow() {
                info!(scraper = %scraper.name(), remaining = units.len() - index, "Run cancelled");
                report.cancelled = true;
                break;
            }

            let result = self.scrape_one(scraper, plan, session, unit).await;
            let outcome = match result {
                ItemResult::Observed(observation) => {
                    report.observations.push(observation);
                    "ok"
                }
                ItemResult::Empty => {
                    report.empty += 1;
                    "empty"
                }
                ItemResult::Failed(error) => {
                    warn!(
                        scraper = %scraper.name(),
                        product_id = unit.product_id,
                        manufacturer_id = %unit.label(),
                        error = %error,
                        "Failed to scrape unit"
                    );
                    report.failures.push(ItemFailure {
                        product_id: unit.product_id,
                        manufacturer_id: unit.manufacturer_id.clone(),
                        error,
                    });
                    "failed"
                }
            };
            metrics::counter!("scrape_items_total", "retailer" => scraper.name().to_string(), "result" => outcome)
                .increment(1);

            if plan.take_screenshots {
                match timeout(self.settings.item_timeout, session.screenshot(&self.settings.screenshot_dir)).await {
                    Ok(Ok(path)) => debug!(product_id = unit.product_id, path = %path.display(), "Saved screenshot"),
                    Ok(Err(e)) => warn!(product_id = unit.product_id, error = %e, "Failed to take screenshot"),
                    Err(_) => warn!(
                        product_id = unit.product_id,
                        timeout = ?self.settings.item_timeout,
                        "Screenshot timed out"
                    ),
                }
            }
        }

        report
    }

    async fn scrape_one(
        &self,
        scraper: &dyn RetailerScraper,
        plan: &SessionPlan,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> ItemResult {
        let attempt = timeout(self.settings.item_timeout, scraper.scrape(plan.method, session, unit));

        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(Ok(Some(observation)))) => ItemResult::Observed(observation),
            Ok(Ok(Ok(None))) => ItemResult::Empty,
            Ok(Ok(Err(e))) => ItemResult::Failed(e.to_string()),
            Ok(Err(_)) => ItemResult::Failed(ScrapeError::Timeout(self.settings.item_timeout).to_string()),
            Err(_) => ItemResult::Failed("scraper panicked".to_string()),
        }
    }
}
