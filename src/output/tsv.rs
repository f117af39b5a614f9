//! Per-account timeline export
//!
//! Writes one tab-separated file per account under `{export_dir}/post/{id}.tsv`. Only
//! accounts whose timeline task is complete are exported, so a file never holds a
//! partial history. Files that already exist are left alone, which makes the export
//! resumable. Each file is written under a `.tmp` name and renamed into place once
//! complete, so an interrupted export never leaves a truncated `.tsv` behind.

use crate::state::{AccountId, Post, TaskType};
use crate::storage::Storage;
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column header of every exported file
pub const TSV_HEADER: &str = "id\ttext\tcreated_at\tin_reply_to_id\taccount_id";

/// What an export pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub written: usize,
    pub existing: usize,
    pub incomplete: usize,
}

/// Path of the export file for one account
pub fn export_path(export_dir: &Path, account_id: AccountId) -> PathBuf {
    export_dir.join("post").join(format!("{}.tsv", account_id))
}

/// Exports every completed timeline to its own file
///
/// # Arguments
///
/// * `storage` - The storage backend holding posts and tasks
/// * `export_dir` - Root directory of the export
///
/// # Returns
///
/// * `Ok(ExportSummary)` - Counts of written and skipped accounts
/// * `Err(TrawlError)` - A query or file write failed
pub fn export_timelines(storage: &dyn Storage, export_dir: &Path) -> Result<ExportSummary> {
    std::fs::create_dir_all(export_dir.join("post"))?;

    let mut summary = ExportSummary::default();
    for account_id in storage.accounts_with_posts()? {
        if !storage.has_completed_task(account_id, TaskType::Timeline)? {
            summary.incomplete += 1;
            continue;
        }

        let path = export_path(export_dir, account_id);
        if path.exists() {
            summary.existing += 1;
            continue;
        }

        let posts = storage.get_posts(account_id)?;
        write_posts(&path, &posts)?;
        summary.written += 1;
    }

    tracing::info!(
        "Exported {} timelines to {} ({} already present, {} incomplete)",
        summary.written,
        export_dir.display(),
        summary.existing,
        summary.incomplete
    );
    Ok(summary)
}

fn write_posts(path: &Path, posts: &[Post]) -> Result<()> {
    let partial = path.with_extension("tsv.tmp");
    {
        let mut writer = BufWriter::new(File::create(&partial)?);
        writer.write_all(format_posts(posts).as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&partial, path)?;
    Ok(())
}

/// Formats posts as TSV with a header row
pub fn format_posts(posts: &[Post]) -> String {
    let mut tsv = String::new();
    tsv.push_str(TSV_HEADER);
    tsv.push('\n');

    for post in posts {
        let fields = [
            escape_field(&post.id),
            escape_field(&post.text),
            escape_field(post.created_at.as_deref().unwrap_or("")),
            escape_field(post.in_reply_to_id.as_deref().unwrap_or("")),
            post.account_id.to_string(),
        ];
        tsv.push_str(&fields.join("\t"));
        tsv.push('\n');
    }

    tsv
}

/// Escapes the characters that would break a TSV row
fn escape_field(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}
