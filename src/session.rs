//! The scraping session: an external, stateful browser resource that a
//! harness run acquires once and releases once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::models::{BrowserMode, RetailerConfig, ScrapingMethod};
use crate::utils::error::AppError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to launch session: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Failed to read page: {0}")]
    Content(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Failed to close session: {0}")]
    Close(String),

    #[error("Session driver error: {0}")]
    Driver(String),
}

/// A JSON response recorded by a `wire` session while pages load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedResponse {
    pub url: String,
    pub body: serde_json::Value,
}

/// How to acquire the session for one run, derived from the retailer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub method: ScrapingMethod,
    pub mode: BrowserMode,
    pub headless: bool,
    pub proxy: Option<String>,
    pub take_screenshots: bool,
}

impl SessionPlan {
    /// Checks the method/mode combination. `api` with `uc` is refused;
    /// `api` behind a proxy is allowed with a warning.
    pub fn from_config(config: &RetailerConfig) -> Result<Self, AppError> {
        config.validate()?;

        let settings = &config.selenium_settings;
        if config.scraping_method == ScrapingMethod::Api && settings.proxy.is_some() {
            warn!(
                proxy = settings.proxy.as_deref().unwrap_or_default(),
                "Using a proxy will probably interfere with capturing API requests, consider ui or sitemap mode"
            );
        }

        Ok(Self {
            method: config.scraping_method,
            mode: settings.mode,
            headless: !settings.headed,
            proxy: settings.proxy.clone(),
            take_screenshots: config.take_screenshots,
        })
    }
}

#[async_trait]
pub trait ScrapeSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// HTML of the current page.
    async fn content(&self) -> Result<String, SessionError>;

    async fn current_url(&self) -> Result<String, SessionError>;

    /// JSON responses recorded since the session opened. Always empty for
    /// sessions that do not record traffic.
    async fn captured_responses(&self) -> Vec<CapturedResponse>;

    async fn screenshot(&self, dir: &Path) -> Result<PathBuf, SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, plan: &SessionPlan) -> Result<Box<dyn ScrapeSession>, SessionError>;
}
