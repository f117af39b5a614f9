//! Social-Trawl: a resumable social graph crawler
//!
//! This crate crawls accounts, their posts and their follower/friend lists starting
//! from a seed set, persisting everything in SQLite. Work is tracked as durable
//! `(account, task type)` rows so an interrupted crawl picks up where it left off.

pub mod config;
pub mod crawler;
pub mod output;
pub mod seeds;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Social-Trawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] crawler::ApiError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid seed record at line {line}: {message}")]
    SeedRecord { line: usize, message: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Crawl worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Social-Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use state::{Account, AccountId, EdgeKind, Post, Task, TaskStatus, TaskType};
