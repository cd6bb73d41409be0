// Integration tests for the price refresher
// These tests run the selector, harness, reconciler and orchestrator against
// a real SQLite catalog with a scripted browser session.

pub mod eligibility_tests;
pub mod tick_tests;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use price_refresher::catalog::{CatalogStore, SqliteCatalog};
use price_refresher::harness::HarnessSettings;
use price_refresher::models::{
    BrowserMode, NewProduct, NewRetailer, Observation, Product, Retailer, RetailerConfig, ScrapeTiers, ScrapeUnit,
    ScrapingMethod, SeleniumSettings,
};
use price_refresher::scrapers::{RetailerScraper, ScrapeError, ScraperRegistry};
use price_refresher::session::{CapturedResponse, ScrapeSession, SessionError, SessionLauncher, SessionPlan};
use price_refresher::tick::TickOrchestrator;

mockall::mock! {
    pub Launcher {}

    #[async_trait]
    impl SessionLauncher for Launcher {
        async fn launch(&self, plan: &SessionPlan) -> Result<Box<dyn ScrapeSession>, SessionError>;
    }
}

pub const RETAILER_NAME: &str = "Spielzeug Fuchs";

pub fn current_year() -> i32 {
    Utc::now().year()
}

pub async fn create_test_catalog() -> anyhow::Result<Arc<SqliteCatalog>> {
    Ok(Arc::new(SqliteCatalog::in_memory().await?))
}

pub fn new_retailer(name: &str, method: ScrapingMethod, mode: BrowserMode) -> NewRetailer {
    NewRetailer {
        name: name.to_string(),
        base_url: "https://www.spielzeug-fuchs.example".to_string(),
        scraping_config: RetailerConfig {
            base_url: "https://www.spielzeug-fuchs.example".to_string(),
            scraping_method: method,
            take_screenshots: false,
            selenium_settings: SeleniumSettings {
                mode,
                headed: false,
                proxy: None,
            },
        },
        affiliate_tag: Some("fuchs-21".to_string()),
        scrape_intervals: ScrapeTiers {
            current_year: 21600,
            previous_year: 43200,
            older: 86400,
        },
        excluded_brands: vec!["Cobi".to_string()],
        base_image_url: None,
    }
}

pub async fn seed_retailer(catalog: &SqliteCatalog) -> anyhow::Result<Retailer> {
    Ok(catalog
        .insert_retailer(&new_retailer(RETAILER_NAME, ScrapingMethod::Ui, BrowserMode::Uc))
        .await?)
}

pub async fn seed_product(
    catalog: &SqliteCatalog,
    manufacturer_id: &str,
    manufacturer: Option<&str>,
    release_year: Option<i32>,
) -> anyhow::Result<Product> {
    Ok(catalog
        .insert_product(&NewProduct {
            manufacturer_id: Some(manufacturer_id.to_string()),
            name: Some(format!("Set {}", manufacturer_id)),
            manufacturer: manufacturer.map(String::from),
            category: Some("Bausteine".to_string()),
            release_year,
            ..NewProduct::default()
        })
        .await?)
}

/// Session that does nothing but count how often it was closed.
pub struct CountingSession {
    pub closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ScrapeSession for CountingSession {
    async fn navigate(&self, _url: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn content(&self) -> Result<String, SessionError> {
        Ok(String::new())
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        Ok("https://www.spielzeug-fuchs.example".to_string())
    }

    async fn captured_responses(&self) -> Vec<CapturedResponse> {
        Vec::new()
    }

    async fn screenshot(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        Ok(dir.join("screenshot.png"))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher handing out counting sessions. Returns the close counter.
pub fn counting_launcher(launches: usize) -> (MockLauncher, Arc<AtomicUsize>) {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let mut launcher = MockLauncher::new();
    launcher.expect_launch().times(launches).returning(move |_| {
        let session: Box<dyn ScrapeSession> = Box::new(CountingSession {
            closes: Arc::clone(&counter),
        });
        Ok(session)
    });
    (launcher, closes)
}

/// Scripted prices per manufacturer id. Ids without an entry are not found;
/// `Err` entries fail the unit.
#[derive(Clone, Default)]
pub struct ScriptedScraper {
    name: String,
    pub prices: Arc<Mutex<HashMap<String, Result<f64, String>>>>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedScraper {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn set_price(&self, manufacturer_id: &str, price: f64) {
        self.prices.lock().unwrap().insert(manufacturer_id.to_string(), Ok(price));
    }

    pub fn set_failure(&self, manufacturer_id: &str, message: &str) {
        self.prices
            .lock()
            .unwrap()
            .insert(manufacturer_id.to_string(), Err(message.to_string()));
    }
}

#[async_trait]
impl RetailerScraper for ScriptedScraper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape_by_ui(
        &self,
        _session: &dyn ScrapeSession,
        unit: &ScrapeUnit,
    ) -> Result<Option<Observation>, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.prices.lock().unwrap().get(&unit.label()).cloned();

        match scripted {
            None => Ok(None),
            Some(Err(message)) => Err(ScrapeError::Other(message)),
            Some(Ok(price)) => Ok(Some(Observation {
                product_id: unit.product_id,
                retailer_id: unit.retailer_id,
                price: Some(price),
                shipping_cost: Some(3.95),
                in_stock: Some(true),
                url: Some(format!("https://www.spielzeug-fuchs.example/p/{}", unit.label())),
            })),
        }
    }
}

pub fn test_settings() -> HarnessSettings {
    HarnessSettings {
        acquire_timeout: Duration::from_secs(5),
        item_timeout: Duration::from_secs(5),
        screenshot_dir: PathBuf::from("data/screenshots"),
    }
}

pub async fn create_orchestrator(
    catalog: Arc<SqliteCatalog>,
    launcher: MockLauncher,
    scraper: &ScriptedScraper,
) -> TickOrchestrator {
    let registry = ScraperRegistry::new();
    registry.register(Arc::new(scraper.clone())).await;
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    TickOrchestrator::new(catalog, Arc::new(launcher), registry, test_settings(), cancel_rx)
}
