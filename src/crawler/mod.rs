//! Crawler module for social graph collection
//!
//! This module contains the core crawling logic, including:
//! - The API collaborator trait and its HTTP implementation
//! - Work scheduling over the durable task queue
//! - The per-worker crawl driver
//! - Overall crawl coordination

mod api;
mod coordinator;
mod driver;
mod http;
mod scheduler;

pub use api::{ApiError, ApiResult, SocialApi};
pub use coordinator::{run_crawl, Coordinator, CrawlOptions};
pub use driver::{CrawlDriver, CrawlReport, TaskOutcome, WorkerSignals};
pub use http::{build_http_client, HttpSocialApi};
pub use scheduler::{RetryPolicy, Scheduler, WorkItem};

use crate::config::Config;
use crate::Result;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the database and record a new run
/// 2. Return claims left pending by an interrupted run to the queue
/// 3. Enqueue the configured seeds
/// 4. Run the worker pool until no claimable work remains
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
///
/// # Returns
///
/// * `Ok(CrawlReport)` - What the crawl did
/// * `Err(TrawlError)` - Crawl failed
pub async fn crawl(config: Config, config_hash: String) -> Result<CrawlReport> {
    run_crawl(config, config_hash, CrawlOptions::default()).await
}
