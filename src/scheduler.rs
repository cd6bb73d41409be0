use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::config::SchedulerConfig;
use crate::harness::HarnessSettings;
use crate::models::{Retailer, Tier};
use crate::scrapers::ScraperRegistry;
use crate::session::SessionLauncher;
use crate::tick::{TickOrchestrator, TickReport};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobKey {
    pub retailer_id: i64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub retailer_id: i64,
    pub retailer_name: String,
    pub tier: Tier,
    pub interval_secs: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Firings dropped because the previous tick for the same key was still running.
    pub skipped_count: u64,
    pub last_error: Option<String>,
    pub last_report: Option<TickReport>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum JobStatus {
    Active,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub skipped_runs: u64,
    pub uptime_seconds: u64,
}

/// State shared between the scheduler and its job closures.
#[derive(Clone)]
struct JobContext {
    orchestrator: Arc<TickOrchestrator>,
    jobs: Arc<RwLock<HashMap<JobKey, JobInfo>>>,
    in_flight: Arc<StdMutex<HashSet<JobKey>>>,
}

/// Releases a key from the in-flight set even if the tick unwinds.
struct InFlightGuard {
    in_flight: Arc<StdMutex<HashSet<JobKey>>>,
    key: JobKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
    }
}

impl JobContext {
    fn try_begin(&self, key: JobKey) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.insert(key).then(|| InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        })
    }

    /// Runs one tick unless the previous one for the same key is still going.
    /// Returns `None` for a skipped firing. Errors are recorded, never returned.
    async fn fire(&self, key: JobKey) -> Option<TickReport> {
        let Some(_guard) = self.try_begin(key) else {
            tracing::info!(retailer_id = key.retailer_id, tier = %key.tier, "Previous tick still running, skipping");
            if let Some(job) = self.jobs.write().await.get_mut(&key) {
                job.skipped_count += 1;
            }
            return None;
        };

        if let Some(job) = self.jobs.write().await.get_mut(&key) {
            job.status = JobStatus::Running;
        }

        let result = self.orchestrator.run_tick(key.retailer_id, key.tier).await;

        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&key);
        match result {
            Ok(report) => {
                if let Some(job) = job {
                    job.last_run = Some(Utc::now());
                    job.run_count += 1;
                    job.success_count += 1;
                    job.status = JobStatus::Active;
                    job.last_error = None;
                    job.last_report = Some(report.clone());
                }
                Some(report)
            }
            Err(e) => {
                if let Some(job) = job {
                    job.last_run = Some(Utc::now());
                    job.run_count += 1;
                    job.error_count += 1;
                    job.status = JobStatus::Error;
                    job.last_error = Some(e.to_string());
                }
                None
            }
        }
    }
}

/// One repeated job per (retailer, tier), fired at the tier's interval.
pub struct RefreshScheduler {
    scheduler: JobScheduler,
    catalog: Arc<dyn CatalogStore>,
    registry: ScraperRegistry,
    context: JobContext,
    shutdown: watch::Sender<bool>,
    config: SchedulerConfig,
    start_time: DateTime<Utc>,
}

impl RefreshScheduler {
    pub async fn new(
        catalog: Arc<dyn CatalogStore>,
        launcher: Arc<dyn SessionLauncher>,
        registry: ScraperRegistry,
        settings: HarnessSettings,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        let (shutdown, cancel) = watch::channel(false);
        let orchestrator = TickOrchestrator::new(Arc::clone(&catalog), launcher, registry.clone(), settings, cancel);

        Ok(Self {
            scheduler,
            catalog,
            registry,
            context: JobContext {
                orchestrator: Arc::new(orchestrator),
                jobs: Arc::new(RwLock::new(HashMap::new())),
                in_flight: Arc::new(StdMutex::new(HashSet::new())),
            },
            shutdown,
            config,
            start_time: Utc::now(),
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        tracing::info!("Refresh scheduler started");
        Ok(())
    }

    /// Signals in-flight ticks to stop after their current unit, waits up to
    /// `grace` for them to close their sessions, then stops the scheduler.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        self.shutdown.send_replace(true);

        let deadline = tokio::time::Instant::now() + grace;
        while self.running_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let abandoned = self.running_count();
        if abandoned > 0 {
            tracing::warn!(running = abandoned, "Shutting down with ticks still running");
        }

        self.scheduler.shutdown().await?;
        tracing::info!("Refresh scheduler shutdown");
        Ok(())
    }

    /// Schedules every retailer that has a registered scraper. Returns the
    /// number of retailers scheduled.
    pub async fn schedule_all(&self) -> Result<usize> {
        let mut scheduled = 0;
        for retailer in self.catalog.list_retailers().await? {
            if !self.registry.contains(&retailer.name).await {
                tracing::warn!(retailer = %retailer.name, "No scraper registered, not scheduling");
                continue;
            }
            self.schedule_retailer(&retailer).await?;
            scheduled += 1;
        }
        Ok(scheduled)
    }

    /// (Re)schedules all tiers of one retailer.
    pub async fn schedule_retailer(&self, retailer: &Retailer) -> Result<()> {
        self.unschedule_retailer(retailer.id).await?;

        for tier in Tier::ALL {
            let key = JobKey {
                retailer_id: retailer.id,
                tier,
            };
            let interval = retailer.interval(tier);

            let context = self.context.clone();
            let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
                let context = context.clone();
                Box::pin(async move {
                    context.fire(key).await;
                })
            })?;
            let id = self.scheduler.add(job).await?;

            self.context.jobs.write().await.insert(
                key,
                JobInfo {
                    id,
                    retailer_id: retailer.id,
                    retailer_name: retailer.name.clone(),
                    tier,
                    interval_secs: interval.as_secs(),
                    status: JobStatus::Active,
                    created_at: Utc::now(),
                    last_run: None,
                    run_count: 0,
                    success_count: 0,
                    error_count: 0,
                    skipped_count: 0,
                    last_error: None,
                    last_report: None,
                },
            );

            if self.config.run_on_start {
                let context = self.context.clone();
                tokio::spawn(async move {
                    context.fire(key).await;
                });
            }

            tracing::info!(retailer = %retailer.name, tier = %tier, interval_secs = interval.as_secs(), "Scheduled refresh");
        }

        Ok(())
    }

    pub async fn unschedule_retailer(&self, retailer_id: i64) -> Result<()> {
        let removed: Vec<JobInfo> = {
            let mut jobs = self.context.jobs.write().await;
            Tier::ALL
                .into_iter()
                .filter_map(|tier| jobs.remove(&JobKey { retailer_id, tier }))
                .collect()
        };

        for job in removed {
            self.scheduler.remove(&job.id).await?;
            tracing::info!(retailer_id, tier = %job.tier, job = %job.id, "Unscheduled refresh");
        }
        Ok(())
    }

    /// Runs one tick outside the schedule. `None` if that (retailer, tier) is
    /// already running or the tick failed; see `get_job_info` for the error.
    pub async fn run_now(&self, retailer_id: i64, tier: Tier) -> Option<TickReport> {
        self.context.fire(JobKey { retailer_id, tier }).await
    }

    pub async fn get_job_info(&self, retailer_id: i64, tier: Tier) -> Option<JobInfo> {
        let jobs = self.context.jobs.read().await;
        jobs.get(&JobKey { retailer_id, tier }).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.context.jobs.read().await;
        let mut list: Vec<JobInfo> = jobs.values().cloned().collect();
        list.sort_by_key(|job| (job.retailer_id, job.tier as u8));
        list
    }

    pub fn is_running(&self, retailer_id: i64, tier: Tier) -> bool {
        let in_flight = self.context.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.contains(&JobKey { retailer_id, tier })
    }

    fn running_count(&self) -> usize {
        self.context.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.context.jobs.read().await;
        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            total_jobs: jobs.len(),
            running_jobs: self.running_count(),
            completed_runs: jobs.values().map(|j| j.success_count).sum(),
            failed_runs: jobs.values().map(|j| j.error_count).sum(),
            skipped_runs: jobs.values().map(|j| j.skipped_count).sum(),
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }
}
