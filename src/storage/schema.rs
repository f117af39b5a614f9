//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Social-Trawl database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Account profiles
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    screen_name TEXT,
    name TEXT,
    created_at TEXT,
    followers_count INTEGER,
    friends_count INTEGER,
    statuses_count INTEGER,
    description TEXT,
    location TEXT,
    lang TEXT,
    is_seed INTEGER NOT NULL DEFAULT 0,
    added TEXT NOT NULL
);

-- Posts collected from account timelines
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    account_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT,
    in_reply_to_id TEXT,
    added TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_account ON posts(account_id);

-- Directed relationship edges, read as "source <kind> target"
CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL,
    target_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    UNIQUE(source_id, target_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id, kind);

-- Task queue: one row per (account, task type)
-- attempts, retry_after and parked track transient failures within the current run
CREATE TABLE IF NOT EXISTS tasks (
    account_id INTEGER NOT NULL,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    status_date TEXT NOT NULL,
    added TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    retry_after TEXT,
    parked INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, task_type)
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, task_type);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
