pub mod browser;
pub mod catalog;
pub mod config;
pub mod eligibility;
pub mod harness;
pub mod models;
pub mod reconciler;
pub mod scheduler;
pub mod scrapers;
pub mod session;
pub mod tick;
pub mod utils;

// Re-export commonly used types
pub use catalog::{CatalogStore, SqliteCatalog};
pub use config::AppConfig;
pub use eligibility::EligibilitySelector;
pub use harness::{HarnessSettings, RunReport, ScrapeHarness};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use scheduler::RefreshScheduler;
pub use tick::{TickOrchestrator, TickReport};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
