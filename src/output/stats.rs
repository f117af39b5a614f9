//! Statistics generation from crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::state::{TaskStatus, TaskType};
use crate::storage::{RunRecord, Storage};
use crate::Result;
use std::collections::BTreeMap;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Task counts keyed by type, then status
    pub tasks: BTreeMap<TaskType, BTreeMap<TaskStatus, u64>>,

    /// Total tasks per status across all types
    pub tasks_by_status: BTreeMap<TaskStatus, u64>,

    /// Accounts with at least one incomplete task
    pub frontier_accounts: u64,

    /// Stored profiles
    pub accounts: u64,

    /// Stored profiles that came from seed input
    pub seed_accounts: u64,

    /// Stored posts
    pub posts: u64,

    /// Stored relationship edges
    pub edges: u64,

    /// Most recent crawl run, if any
    pub latest_run: Option<RunRecord>,
}

impl CrawlStatistics {
    /// Total number of task rows
    pub fn total_tasks(&self) -> u64 {
        self.tasks_by_status.values().sum()
    }

    /// Number of tasks in one status
    pub fn status_count(&self, status: TaskStatus) -> u64 {
        self.tasks_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(TrawlError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CrawlStatistics> {
    let mut tasks = BTreeMap::new();
    for task_type in TaskType::SEED_TASKS {
        let mut by_status = BTreeMap::new();
        for status in TaskStatus::all_statuses() {
            by_status.insert(status, storage.count_tasks(task_type, status)?);
        }
        tasks.insert(task_type, by_status);
    }

    let mut tasks_by_status = BTreeMap::new();
    for status in TaskStatus::all_statuses() {
        tasks_by_status.insert(status, storage.count_tasks_by_status(status)?);
    }

    Ok(CrawlStatistics {
        tasks,
        tasks_by_status,
        frontier_accounts: storage.count_frontier_accounts()?,
        accounts: storage.count_accounts()?,
        seed_accounts: storage.count_seed_accounts()?,
        posts: storage.count_posts()?,
        edges: storage.count_edges()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest run:");
        println!("  Run {}: {}", run.id, run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!();
    }

    println!("Collected data:");
    println!(
        "  Profiles: {} ({} seeds)",
        stats.accounts, stats.seed_accounts
    );
    println!("  Posts: {}", stats.posts);
    println!("  Relationship edges: {}", stats.edges);
    println!();

    println!("Tasks:");
    println!(
        "  {:<10} {:>12} {:>10} {:>10}",
        "type", "incomplete", "pending", "complete"
    );
    for (task_type, by_status) in &stats.tasks {
        let count = |status: TaskStatus| by_status.get(&status).copied().unwrap_or(0);
        println!(
            "  {:<10} {:>12} {:>10} {:>10}",
            task_type.to_db_string(),
            count(TaskStatus::Incomplete),
            count(TaskStatus::Pending),
            count(TaskStatus::Complete)
        );
    }
    println!();

    let total = stats.total_tasks();
    let complete = stats.status_count(TaskStatus::Complete);
    let progress = if total > 0 {
        (complete as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Progress: {:.1}% ({} / {} tasks complete, {} accounts in frontier)",
        progress, complete, total, stats.frontier_accounts
    );
}
