use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{BrowserMode, ScrapingMethod, Tier};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeleniumSettings {
    #[serde(default)]
    pub mode: BrowserMode,
    #[serde(default = "default_headed")]
    pub headed: bool,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_headed() -> bool {
    true
}

impl Default for SeleniumSettings {
    fn default() -> Self {
        Self {
            mode: BrowserMode::Uc,
            headed: true,
            proxy: None,
        }
    }
}

/// Persisted per-retailer scraping configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetailerConfig {
    pub base_url: String,
    pub scraping_method: ScrapingMethod,
    #[serde(default)]
    pub take_screenshots: bool,
    #[serde(default)]
    pub selenium_settings: SeleniumSettings,
}

impl RetailerConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(AppError::InvalidConfiguration(format!("Invalid base URL: {}", self.base_url)));
        }

        // Stealth sessions cannot record network traffic, which api scraping needs.
        if self.scraping_method == ScrapingMethod::Api && self.selenium_settings.mode == BrowserMode::Uc {
            return Err(AppError::InvalidConfiguration(
                "uc mode is not supported for api scraping, use wire mode or the ui/sitemap method".to_string(),
            ));
        }

        if let Some(proxy) = &self.selenium_settings.proxy {
            if proxy.trim().is_empty() {
                return Err(AppError::InvalidConfiguration("Proxy must not be empty when set".to_string()));
            }
        }

        Ok(())
    }
}

/// Minimum re-check interval per tier, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeTiers {
    pub current_year: u64,
    pub previous_year: u64,
    pub older: u64,
}

impl Default for ScrapeTiers {
    fn default() -> Self {
        Self {
            current_year: 6 * 3600,
            previous_year: 12 * 3600,
            older: 24 * 3600,
        }
    }
}

impl ScrapeTiers {
    pub fn seconds(&self, tier: Tier) -> u64 {
        match tier {
            Tier::CurrentYear => self.current_year,
            Tier::PreviousYear => self.previous_year,
            Tier::Older => self.older,
        }
    }

    pub fn interval(&self, tier: Tier) -> Duration {
        Duration::from_secs(self.seconds(tier))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for tier in Tier::ALL {
            if self.seconds(tier) == 0 {
                return Err(AppError::InvalidConfiguration(format!(
                    "Scrape interval for tier {} must be greater than 0",
                    tier
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Retailer {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub scraping_config: RetailerConfig,
    pub affiliate_tag: Option<String>,
    pub scrape_intervals: ScrapeTiers,
    /// Manufacturer names never scraped at this retailer.
    pub excluded_brands: Vec<String>,
    pub base_image_url: Option<String>,
}

impl Retailer {
    pub fn interval(&self, tier: Tier) -> Duration {
        self.scrape_intervals.interval(tier)
    }

    pub fn excludes_brand(&self, manufacturer: &str) -> bool {
        self.excluded_brands.iter().any(|brand| brand == manufacturer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRetailer {
    pub name: String,
    pub base_url: String,
    pub scraping_config: RetailerConfig,
    #[serde(default)]
    pub affiliate_tag: Option<String>,
    #[serde(default)]
    pub scrape_intervals: ScrapeTiers,
    #[serde(default)]
    pub excluded_brands: Vec<String>,
    #[serde(default)]
    pub base_image_url: Option<String>,
}

impl NewRetailer {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidConfiguration("Retailer name must not be empty".to_string()));
        }
        self.scraping_config.validate()?;
        self.scrape_intervals.validate()
    }
}
