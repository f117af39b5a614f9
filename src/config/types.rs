use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Social-Trawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub seeds: SeedConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent crawl workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of PROFILE tasks claimed and fetched together (1 disables batching)
    #[serde(rename = "profile-batch-size", default = "default_profile_batch_size")]
    pub profile_batch_size: usize,

    /// Log worker progress every this many units of work
    #[serde(rename = "progress-interval", default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Transient failures of one task before it is left for the next run
    #[serde(rename = "max-task-attempts", default = "default_max_task_attempts")]
    pub max_task_attempts: u32,

    /// Delay before retrying a failed task; doubles with each failure (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Remote API client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint is resolved against
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Bearer token sent with every request
    #[serde(rename = "bearer-token", default)]
    pub bearer_token: Option<String>,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for network errors and 5xx responses before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between those retries (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Sleep through 429 responses instead of failing the task
    #[serde(rename = "wait-on-rate-limit", default = "default_wait_on_rate_limit")]
    pub wait_on_rate_limit: bool,

    /// Longest single rate limit wait honored (seconds)
    #[serde(
        rename = "max-rate-limit-wait-secs",
        default = "default_max_rate_limit_wait_secs"
    )]
    pub max_rate_limit_wait_secs: u64,

    /// Page size requested from paginated endpoints
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving TSV exports
    #[serde(rename = "export-dir", default = "default_export_dir")]
    pub export_dir: String,
}

/// Seed accounts to start the crawl from
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    /// Seed account ids
    #[serde(default)]
    pub ids: Vec<i64>,

    /// JSON-lines file of seed source records
    #[serde(rename = "source-file", default)]
    pub source_file: Option<PathBuf>,
}

impl SeedConfig {
    /// Returns true if no seeds of any kind are configured
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.source_file.is_none()
    }
}

fn default_workers() -> usize {
    4
}

fn default_profile_batch_size() -> usize {
    100
}

fn default_progress_interval() -> u64 {
    25
}

fn default_max_task_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_wait_on_rate_limit() -> bool {
    true
}

fn default_max_rate_limit_wait_secs() -> u64 {
    900
}

fn default_page_size() -> u32 {
    200
}

fn default_export_dir() -> String {
    "./export".to_string()
}
