//! Output module for crawl statistics and exports
//!
//! This module handles:
//! - Recording and printing crawl statistics
//! - Exporting collected timelines as TSV files

pub mod stats;
mod tsv;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use tsv::{export_path, export_timelines, format_posts, ExportSummary, TSV_HEADER};
