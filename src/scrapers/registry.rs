use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::selector::{SelectorScraper, SelectorScraperConfig};
use super::traits::RetailerScraper;
use crate::utils::error::AppError;

pub type ScraperHandle = Arc<dyn RetailerScraper>;

/// Retailer name to scraper implementation.
#[derive(Clone)]
pub struct ScraperRegistry {
    scrapers: Arc<RwLock<HashMap<String, ScraperHandle>>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self {
            scrapers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Builds a selector scraper for every configured retailer.
    pub async fn from_config(configs: &[SelectorScraperConfig]) -> Result<Self, AppError> {
        let registry = Self::new();
        for config in configs {
            registry.register(Arc::new(SelectorScraper::new(config.clone())?)).await;
        }
        Ok(registry)
    }

    /// Registers a scraper under its own name, replacing any previous one.
    pub async fn register(&self, scraper: ScraperHandle) {
        let name = scraper.name().to_string();
        let mut scrapers = self.scrapers.write().await;
        if scrapers.insert(name.clone(), scraper).is_some() {
            info!(scraper = %name, "Replaced scraper");
        }
    }

    pub async fn get(&self, retailer: &str) -> Option<ScraperHandle> {
        let scrapers = self.scrapers.read().await;
        scrapers.get(retailer).cloned()
    }

    pub async fn contains(&self, retailer: &str) -> bool {
        self.scrapers.read().await.contains_key(retailer)
    }

    pub async fn list(&self) -> Vec<String> {
        let scrapers = self.scrapers.read().await;
        let mut names: Vec<String> = scrapers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ScraperRegistry {
    fn default() -> Self {
        Self::new()
    }
}
