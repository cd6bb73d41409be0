use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::models::BrowserMode;
use crate::session::{CapturedResponse, ScrapeSession, SessionError, SessionLauncher, SessionPlan};

const CAPTURE_HANDLER: &str = "price-refresher-capture";

/// Launches one headless Chrome per harness run.
pub struct ChromeLauncher {
    config: ScraperConfig,
}

pub struct ChromeSession {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    captured: Arc<Mutex<Vec<CapturedResponse>>>,
}

impl ChromeLauncher {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SessionError>
where
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Driver(e.to_string()))?
}

fn launch_chrome(config: &ScraperConfig, plan: &SessionPlan) -> Result<ChromeSession, SessionError> {
    let proxy_arg = plan.proxy.as_ref().map(|proxy| format!("--proxy-server={}", proxy));
    let mut args = vec![
        OsStr::new("--no-sandbox"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-gpu"),
        OsStr::new("--disable-extensions"),
        OsStr::new("--disable-background-timer-throttling"),
        OsStr::new("--disable-renderer-backgrounding"),
    ];
    if let Some(arg) = &proxy_arg {
        args.push(OsStr::new(arg));
    }

    let mut launch_options = LaunchOptions::default_builder()
        .headless(plan.headless)
        .sandbox(false)
        .window_size(Some((config.window_width, config.window_height)))
        .idle_browser_timeout(config.item_timeout() * 4)
        .args(args)
        .build()
        .map_err(|e| SessionError::Launch(format!("invalid launch options: {}", e)))?;

    if let Some(chrome_path) = &config.chrome_path {
        launch_options.path = Some(PathBuf::from(chrome_path));
    }

    let browser = Browser::new(launch_options).map_err(|e| SessionError::Launch(e.to_string()))?;
    let tab = browser.new_tab().map_err(|e| SessionError::Launch(e.to_string()))?;
    tab.set_default_timeout(config.item_timeout());

    if let Some(user_agent) = &config.user_agent {
        tab.set_user_agent(user_agent, None, None)
            .map_err(|e| SessionError::Launch(format!("failed to set user agent: {}", e)))?;
    }

    let captured = Arc::new(Mutex::new(Vec::new()));
    match plan.mode {
        BrowserMode::Uc => {
            tab.enable_stealth_mode()
                .map_err(|e| SessionError::Launch(format!("failed to enable stealth mode: {}", e)))?;
        }
        BrowserMode::Wire => {
            let sink = Arc::clone(&captured);
            tab.register_response_handling(
                CAPTURE_HANDLER,
                Box::new(move |params, fetch_body| {
                    if !params.response.mime_type.contains("json") {
                        return;
                    }
                    let Ok(body) = fetch_body() else {
                        return;
                    };
                    if body.base_64_encoded {
                        return;
                    }
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body.body) {
                        if let Ok(mut responses) = sink.lock() {
                            responses.push(CapturedResponse {
                                url: params.response.url.clone(),
                                body: json,
                            });
                        }
                    }
                }),
            )
            .map_err(|e| SessionError::Launch(format!("failed to record responses: {}", e)))?;
        }
    }

    Ok(ChromeSession {
        browser: Some(browser),
        tab,
        captured,
    })
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, plan: &SessionPlan) -> Result<Box<dyn ScrapeSession>, SessionError> {
        let config = self.config.clone();
        let plan_owned = plan.clone();
        let session = blocking(move || launch_chrome(&config, &plan_owned)).await?;

        info!(
            method = %plan.method,
            mode = %plan.mode,
            headless = plan.headless,
            proxied = plan.proxy.is_some(),
            "Browser session opened"
        );
        Ok(Box::new(session))
    }
}

#[async_trait]
impl ScrapeSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let tab = Arc::clone(&self.tab);
        let target = url.to_string();
        blocking(move || {
            tab.navigate_to(&target)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| SessionError::Navigation {
                    url: target.clone(),
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn content(&self) -> Result<String, SessionError> {
        let tab = Arc::clone(&self.tab);
        blocking(move || tab.get_content().map_err(|e| SessionError::Content(e.to_string()))).await
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        Ok(self.tab.get_url())
    }

    async fn captured_responses(&self) -> Vec<CapturedResponse> {
        match self.captured.lock() {
            Ok(responses) => responses.clone(),
            Err(_) => Vec::new(),
        }
    }

    async fn screenshot(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        let tab = Arc::clone(&self.tab);
        let dir = dir.to_path_buf();
        blocking(move || {
            let data = tab
                .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| SessionError::Screenshot(e.to_string()))?;

            let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
            let filename = format!("screenshot_{}_{}.png", timestamp, uuid::Uuid::new_v4().simple());
            std::fs::create_dir_all(&dir)
                .map_err(|e| SessionError::Screenshot(format!("failed to create {}: {}", dir.display(), e)))?;

            let path = dir.join(filename);
            std::fs::write(&path, data).map_err(|e| SessionError::Screenshot(e.to_string()))?;
            Ok(path)
        })
        .await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            let _ = tab.close(true);
            // Dropping the browser terminates the Chrome process.
            drop(browser);
            Ok(())
        })
        .await?;

        debug!("Browser session closed");
        Ok(())
    }
}
