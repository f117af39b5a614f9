//! Crawler coordinator - main crawl orchestration logic
//!
//! This module ties a crawl run together:
//! - Opening storage and recording the run
//! - Recovering claims left behind by an interrupted process
//! - Loading seeds from the config and the source file
//! - Spawning the worker pool and collecting its report

use crate::config::Config;
use crate::crawler::api::SocialApi;
use crate::crawler::driver::{CrawlDriver, CrawlReport, WorkerSignals};
use crate::crawler::http::HttpSocialApi;
use crate::crawler::scheduler::{RetryPolicy, Scheduler};
use crate::seeds::load_source_records;
use crate::storage::{lock, share, RunStatus, RunStore, SharedStorage, SqliteStorage};
use crate::{Result, TrawlError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Per-invocation crawl switches
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlOptions {
    /// Complete tasks whose results are already stored before crawling
    pub reconcile: bool,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
    scheduler: Scheduler,
    api: Arc<dyn SocialApi>,
    config_hash: String,
}

impl Coordinator {
    /// Creates a coordinator backed by the configured database and HTTP API
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash of the configuration file, recorded with the run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(TrawlError)` - Failed to open storage or build the API client
    pub fn new(config: Config, config_hash: String) -> Result<Self> {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
        let api = Arc::new(HttpSocialApi::new(&config.api)?);
        Ok(Self::from_parts(config, storage, api, config_hash))
    }

    /// Creates a coordinator from an already opened store and any API implementation
    pub fn from_parts(
        config: Config,
        storage: SqliteStorage,
        api: Arc<dyn SocialApi>,
        config_hash: String,
    ) -> Self {
        let storage = share(storage);
        let retry_policy = RetryPolicy {
            max_attempts: config.crawler.max_task_attempts,
            base_backoff: Duration::from_millis(config.crawler.retry_backoff_ms),
        };
        let scheduler = Scheduler::new(Arc::clone(&storage), config.crawler.profile_batch_size)
            .with_retry_policy(retry_policy);

        Self {
            config: Arc::new(config),
            storage,
            scheduler,
            api,
            config_hash,
        }
    }

    /// The scheduler used by this coordinator's workers
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Runs the crawl until no claimable work remains
    ///
    /// The run is recorded as `completed` on success and `failed` when any worker
    /// stops on an error.
    pub async fn run(&self, options: CrawlOptions) -> Result<CrawlReport> {
        let run_id = self.begin_run()?;
        let started = std::time::Instant::now();

        let result = self.crawl(options).await;

        let status = if result.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        lock(&self.storage)?.finish_run(run_id, status)?;

        let report = result?;
        tracing::info!(
            "Crawl run {} finished in {:?}: {}",
            run_id,
            started.elapsed(),
            report
        );
        Ok(report)
    }

    fn begin_run(&self) -> Result<i64> {
        let mut storage = lock(&self.storage)?;

        if let Some(latest) = storage.get_latest_run()? {
            if latest.status == RunStatus::Running {
                tracing::warn!(
                    "Run {} (started {}) did not finish; marking it interrupted",
                    latest.id,
                    latest.started_at
                );
                storage.update_run_status(latest.id, RunStatus::Interrupted)?;
            }
        }

        let run_id = storage.create_run(&self.config_hash)?;
        tracing::info!("Starting crawl run {}", run_id);
        Ok(run_id)
    }

    async fn crawl(&self, options: CrawlOptions) -> Result<CrawlReport> {
        // Nothing may be claimed before stale claims are back in the queue
        self.scheduler.recover_stale_claims()?;
        self.load_seeds()?;

        if options.reconcile {
            self.scheduler.reconcile_completed()?;
        }

        self.run_workers().await
    }

    /// Enqueues the configured seed ids and source file records
    pub fn load_seeds(&self) -> Result<()> {
        let seeds = &self.config.seeds;

        if !seeds.ids.is_empty() {
            let added = self.scheduler.seed(&seeds.ids)?;
            tracing::info!("Seeded {} accounts from config ({} new tasks)", seeds.ids.len(), added);
        }

        if let Some(path) = &seeds.source_file {
            let records = load_source_records(path)?;
            self.scheduler.ingest_source_records(&records)?;
        }

        Ok(())
    }

    async fn run_workers(&self) -> Result<CrawlReport> {
        let workers = self.config.crawler.workers.max(1);
        let signals = Arc::new(WorkerSignals::new());
        let mut pool = JoinSet::new();

        tracing::info!("Starting {} crawl workers", workers);
        for worker_id in 0..workers {
            let driver = CrawlDriver::new(
                worker_id,
                self.scheduler.clone(),
                Arc::clone(&self.api),
                self.config.crawler.progress_interval,
            );
            let signals = Arc::clone(&signals);
            pool.spawn(async move { driver.run(signals).await });
        }

        let mut report = CrawlReport::default();
        let mut first_error: Option<TrawlError> = None;

        while let Some(joined) = pool.join_next().await {
            let error = match joined {
                Ok(Ok(worker_report)) => {
                    report.merge(&worker_report);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) => {
                    signals.halt();
                    TrawlError::Worker(e.to_string())
                }
            };

            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Runs a complete crawl against the configured database and API
///
/// # Example
///
/// ```no_run
/// use social_trawl::config::load_config_with_hash;
/// use social_trawl::crawler::{run_crawl, CrawlOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("config.toml"))?;
/// run_crawl(config, hash, CrawlOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: String,
    options: CrawlOptions,
) -> Result<CrawlReport> {
    let coordinator = Coordinator::new(config, config_hash)?;
    coordinator.run(options).await
}
