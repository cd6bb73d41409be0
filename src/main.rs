use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use price_refresher::browser::ChromeLauncher;
use price_refresher::config::{LoggingConfig, MetricsConfig};
use price_refresher::models::{NewRetailer, Tier};
use price_refresher::scrapers::ScraperRegistry;
use price_refresher::{AppConfig, CatalogStore, HarnessSettings, RefreshScheduler, SqliteCatalog, TickOrchestrator};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "price-refresher", version, about = "Keeps retailer price offers fresh")]
struct Cli {
    /// Read configuration from this file instead of the config/ directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedule every retailer and refresh until interrupted.
    Serve,
    /// Run a single tick and print its report.
    Tick {
        #[arg(long)]
        retailer: i64,
        #[arg(long)]
        tier: Tier,
    },
    Retailer {
        #[command(subcommand)]
        command: RetailerCommand,
    },
}

#[derive(Subcommand)]
enum RetailerCommand {
    List,
    /// Add a retailer described by a TOML file.
    Add {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::from_env(),
    }
    .context("failed to load configuration")?;

    let _log_guard = init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let catalog = Arc::new(SqliteCatalog::connect(&config.database).await?);
    catalog.migrate().await?;

    match cli.command {
        Command::Serve => serve(config, catalog).await,
        Command::Tick { retailer, tier } => tick(config, catalog, retailer, tier).await,
        Command::Retailer { command } => match command {
            RetailerCommand::List => list_retailers(catalog.as_ref()).await,
            RetailerCommand::Add { file } => add_retailer(catalog.as_ref(), &file).await,
        },
    }
}

fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("price_refresher=info"),
    };
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("failed to create log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::daily(directory, "price-refresher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry.with(fmt::layer().with_ansi(false).with_writer(writer)).init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(port = config.port, "Serving metrics");
    Ok(())
}

async fn serve(config: AppConfig, catalog: Arc<SqliteCatalog>) -> Result<()> {
    info!("Starting price refresher...");

    let registry = ScraperRegistry::from_config(&config.retailers).await?;
    let launcher = Arc::new(ChromeLauncher::new(config.scraper.clone()));
    let mut scheduler = RefreshScheduler::new(
        catalog,
        launcher,
        registry,
        HarnessSettings::from_config(&config.scraper),
        config.scheduler.clone(),
    )
    .await?;

    let scheduled = scheduler.schedule_all().await?;
    scheduler.start().await?;
    info!(retailers = scheduled, "Refreshing prices, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown(SHUTDOWN_GRACE).await?;
    Ok(())
}

async fn tick(config: AppConfig, catalog: Arc<SqliteCatalog>, retailer_id: i64, tier: Tier) -> Result<()> {
    let registry = ScraperRegistry::from_config(&config.retailers).await?;
    let launcher = Arc::new(ChromeLauncher::new(config.scraper.clone()));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling after the current unit...");
            cancel_tx.send_replace(true);
        }
    });

    let orchestrator = TickOrchestrator::new(
        catalog,
        launcher,
        registry,
        HarnessSettings::from_config(&config.scraper),
        cancel_rx,
    );
    let report = orchestrator.run_tick(retailer_id, tier).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn list_retailers(catalog: &dyn CatalogStore) -> Result<()> {
    for retailer in catalog.list_retailers().await? {
        let intervals = retailer.scrape_intervals;
        println!(
            "{}\t{}\t{}\t{}/{}/{}s\texcluded: {}",
            retailer.id,
            retailer.name,
            retailer.scraping_config.scraping_method,
            intervals.current_year,
            intervals.previous_year,
            intervals.older,
            retailer.excluded_brands.join(", ")
        );
    }
    Ok(())
}

async fn add_retailer(catalog: &dyn CatalogStore, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let new_retailer: NewRetailer = toml::from_str(&text).with_context(|| format!("invalid retailer file {}", file.display()))?;

    let retailer = catalog.insert_retailer(&new_retailer).await?;
    info!(retailer = %retailer.name, id = retailer.id, "Added retailer");
    println!("{}", retailer.id);
    Ok(())
}
