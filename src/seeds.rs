//! Seed source records
//!
//! A source file holds one JSON object per line. Each line is either a profile
//! (`{"id": 12, "screen_name": ...}`) or a collected post with its author embedded
//! under `user`, in which case the author is the seed.

use crate::state::{Account, AccountId};
use crate::{Result, TrawlError};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceRecord {
    Embedded { user: Account },
    Profile(Account),
}

impl SourceRecord {
    fn into_account(self) -> Account {
        match self {
            Self::Embedded { user } => user,
            Self::Profile(account) => account,
        }
    }
}

/// Parses one source line
///
/// Returns `Ok(None)` for blank lines.
pub fn parse_source_line(line: &str, line_number: usize) -> Result<Option<Account>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let record: SourceRecord =
        serde_json::from_str(trimmed).map_err(|e| TrawlError::SeedRecord {
            line: line_number,
            message: e.to_string(),
        })?;

    let account = record.into_account();
    if account.id <= 0 {
        return Err(TrawlError::SeedRecord {
            line: line_number,
            message: format!("account id must be positive, got {}", account.id),
        });
    }

    Ok(Some(account))
}

/// Reads every usable record from a source file
///
/// Malformed lines, including lines that are not valid UTF-8, are logged and
/// skipped; only I/O failures are errors. When an account appears on several lines,
/// the first occurrence wins.
pub fn load_source_records(path: &Path) -> Result<Vec<Account>> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut seen: HashSet<AccountId> = HashSet::new();
    let mut records = Vec::new();
    let mut skipped = 0;

    for (index, bytes) in reader.split(b'\n').enumerate() {
        let bytes = bytes?;
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Skipping source record on line {}: {}", index + 1, e);
                skipped += 1;
                continue;
            }
        };

        match parse_source_line(&line, index + 1) {
            Ok(Some(account)) => {
                if seen.insert(account.id) {
                    records.push(account);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Skipping source record: {}", e);
                skipped += 1;
            }
        }
    }

    tracing::info!(
        "Loaded {} seed records from {} ({} skipped)",
        records.len(),
        path.display(),
        skipped
    );
    Ok(records)
}
