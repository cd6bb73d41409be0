use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Observation, ScrapeUnit, ScrapingMethod};
use crate::session::{ScrapeSession, SessionError};

/// Failure to scrape one unit. Recovered by the harness, never fatal for a run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Failed to parse: {message}")]
    Parse { message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scraping method {0} is not supported by this retailer")]
    Unsupported(ScrapingMethod),

    #[error("{0}")]
    Other(String),
}

impl ScrapeError {
    pub fn parse(message: impl Into<String>) -> Self {
        ScrapeError::Parse { message: message.into() }
    }

    pub fn missing(selector: impl Into<String>) -> Self {
        ScrapeError::ElementNotFound { selector: selector.into() }
    }
}

/// Retailer-specific scraping. Each method turns one unit into at most one
/// observation; `Ok(None)` means the product was not found.
#[async_trait]
pub trait RetailerScraper: Send + Sync {
    /// Retailer name this scraper is registered under.
    fn name(&self) -> &str;

    async fn scrape_by_ui(
        &self,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError>;

    async fn scrape_by_api(
        &self,
        _session: &dyn ScrapeSession,
        _unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        Err(ScrapeError::Unsupported(ScrapingMethod::Api))
    }

    async fn scrape_by_sitemap(
        &self,
        _session: &dyn ScrapeSession,
        _unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        Err(ScrapeError::Unsupported(ScrapingMethod::Sitemap))
    }

    async fn scrape(
        &self,
        method: ScrapingMethod,
        session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        match method {
            ScrapingMethod::Ui => self.scrape_by_ui(session, unit).await,
            ScrapingMethod::Api => self.scrape_by_api(session, unit).await,
            ScrapingMethod::Sitemap => self.scrape_by_sitemap(session, unit).await,
        }
    }
}
