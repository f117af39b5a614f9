//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.
//!
//! Claims run inside an IMMEDIATE transaction and their UPDATE re-checks
//! `status = 'incomplete'`, so two connections on the same database file can never
//! both move one task to `pending`.
//!
//! Timestamps are stored as fixed-width UTC RFC 3339 strings, so `retry_after`
//! compares correctly as text.

use crate::state::{Account, AccountId, EdgeKind, Post, RetryAt, Task, TaskStatus, TaskType};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    ContentStore, RelationshipStore, RunStore, StorageError, StorageResult, TaskStore,
};
use crate::storage::{RunRecord, RunStatus};
use crate::TrawlError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(TrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, TrawlError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Configure SQLite for concurrent readers and a single writer at a time
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, TrawlError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    timestamp(Utc::now())
}

/// A task row before its enum columns are validated
struct RawTask {
    account_id: AccountId,
    task_type: String,
    status: String,
    status_date: String,
    added: String,
}

impl RawTask {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account_id: row.get(0)?,
            task_type: row.get(1)?,
            status: row.get(2)?,
            status_date: row.get(3)?,
            added: row.get(4)?,
        })
    }

    fn into_task(self) -> StorageResult<Task> {
        let task_type =
            TaskType::from_db_string(&self.task_type).ok_or_else(|| StorageError::CorruptValue {
                column: "task_type",
                value: self.task_type.clone(),
            })?;
        let status =
            TaskStatus::from_db_string(&self.status).ok_or_else(|| StorageError::CorruptValue {
                column: "status",
                value: self.status.clone(),
            })?;

        Ok(Task {
            account_id: self.account_id,
            task_type,
            status,
            status_date: self.status_date,
            added: self.added,
        })
    }
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        screen_name: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        followers_count: row.get(4)?,
        friends_count: row.get(5)?,
        statuses_count: row.get(6)?,
        description: row.get(7)?,
        location: row.get(8)?,
        lang: row.get(9)?,
        is_seed: row.get(10)?,
    })
}

/// A run row before its status is validated
struct RawRun {
    id: i64,
    started_at: String,
    finished_at: Option<String>,
    config_hash: String,
    status: String,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            status: row.get(4)?,
        })
    }

    fn into_run(self) -> StorageResult<RunRecord> {
        let status =
            RunStatus::from_db_string(&self.status).ok_or_else(|| StorageError::CorruptValue {
                column: "runs.status",
                value: self.status.clone(),
            })?;

        Ok(RunRecord {
            id: self.id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            config_hash: self.config_hash,
            status,
        })
    }
}

impl TaskStore for SqliteStorage {
    fn enqueue(
        &mut self,
        account_id: AccountId,
        task_type: TaskType,
        initial_status: TaskStatus,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tasks (account_id, task_type, status, status_date, added)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                account_id,
                task_type.to_db_string(),
                initial_status.to_db_string(),
                now()
            ],
        )?;
        Ok(inserted > 0)
    }

    fn enqueue_many(
        &mut self,
        account_ids: &[AccountId],
        task_types: &[TaskType],
    ) -> StorageResult<usize> {
        let now = now();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO tasks (account_id, task_type, status, status_date, added)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
            )?;
            for &account_id in account_ids {
                for task_type in task_types {
                    inserted += stmt.execute(params![
                        account_id,
                        task_type.to_db_string(),
                        TaskStatus::Incomplete.to_db_string(),
                        now
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn claim_one(&mut self, task_types: &[TaskType]) -> StorageResult<Option<Task>> {
        if task_types.is_empty() {
            return Ok(None);
        }

        let placeholders = (0..task_types.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE tasks SET status = ?1, status_date = ?2
             WHERE rowid = (
                 SELECT rowid FROM tasks
                 WHERE status = ?3 AND task_type IN ({})
                   AND parked = 0 AND (retry_after IS NULL OR retry_after <= ?2)
                 ORDER BY RANDOM() LIMIT 1
             ) AND status = ?3
             RETURNING account_id, task_type, status, status_date, added",
            placeholders
        );

        let now = now();
        let mut values = vec![
            TaskStatus::Pending.to_db_string(),
            now.as_str(),
            TaskStatus::Incomplete.to_db_string(),
        ];
        values.extend(task_types.iter().map(|t| t.to_db_string()));

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw = tx
            .query_row(&sql, params_from_iter(values.iter()), RawTask::from_row)
            .optional()?;
        tx.commit()?;

        raw.map(RawTask::into_task).transpose()
    }

    fn claim_batch(
        &mut self,
        task_type: TaskType,
        limit: usize,
    ) -> StorageResult<Vec<AccountId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let claimed = {
            let mut stmt = tx.prepare(
                "UPDATE tasks SET status = ?1, status_date = ?2
                 WHERE rowid IN (
                     SELECT rowid FROM tasks
                     WHERE status = ?3 AND task_type = ?4
                       AND parked = 0 AND (retry_after IS NULL OR retry_after <= ?2)
                     ORDER BY RANDOM() LIMIT ?5
                 ) AND status = ?3
                 RETURNING account_id",
            )?;
            let rows = stmt.query_map(
                params![
                    TaskStatus::Pending.to_db_string(),
                    now,
                    TaskStatus::Incomplete.to_db_string(),
                    task_type.to_db_string(),
                    limit as i64
                ],
                |row| row.get::<_, AccountId>(0),
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;

        Ok(claimed)
    }

    fn set_status(
        &mut self,
        account_id: AccountId,
        task_type: TaskType,
        status: TaskStatus,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE tasks SET status = ?1, status_date = ?2 WHERE account_id = ?3 AND task_type = ?4",
            params![status.to_db_string(), now(), account_id, task_type.to_db_string()],
        )?;
        Ok(())
    }

    fn set_status_str(
        &mut self,
        account_id: AccountId,
        task_type: &str,
        status: &str,
    ) -> StorageResult<bool> {
        let (Some(task_type), Some(status)) = (
            TaskType::from_db_string(task_type),
            TaskStatus::from_db_string(status),
        ) else {
            tracing::debug!(
                "Ignoring status update for {} with task '{}' and status '{}'",
                account_id,
                task_type,
                status
            );
            return Ok(false);
        };

        self.set_status(account_id, task_type, status)?;
        Ok(true)
    }

    fn has_completed_task(
        &self,
        account_id: AccountId,
        task_type: TaskType,
    ) -> StorageResult<bool> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM tasks WHERE account_id = ?1 AND task_type = ?2",
                params![account_id, task_type.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(status.as_deref() == Some(TaskStatus::Complete.to_db_string()))
    }

    fn get_task(&self, account_id: AccountId, task_type: TaskType) -> StorageResult<Option<Task>> {
        let raw = self
            .conn
            .query_row(
                "SELECT account_id, task_type, status, status_date, added
                 FROM tasks WHERE account_id = ?1 AND task_type = ?2",
                params![account_id, task_type.to_db_string()],
                RawTask::from_row,
            )
            .optional()?;

        raw.map(RawTask::into_task).transpose()
    }

    fn reset_pending(&mut self) -> StorageResult<usize> {
        let reset = self.conn.execute(
            "UPDATE tasks SET status = ?1, status_date = ?2 WHERE status = ?3",
            params![
                TaskStatus::Incomplete.to_db_string(),
                now(),
                TaskStatus::Pending.to_db_string()
            ],
        )?;
        Ok(reset)
    }

    fn task_attempts(&self, account_id: AccountId, task_type: TaskType) -> StorageResult<u32> {
        let attempts: Option<u32> = self
            .conn
            .query_row(
                "SELECT attempts FROM tasks WHERE account_id = ?1 AND task_type = ?2",
                params![account_id, task_type.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(attempts.unwrap_or(0))
    }

    fn release_failed(
        &mut self,
        account_id: AccountId,
        task_type: TaskType,
        retry_at: RetryAt,
    ) -> StorageResult<()> {
        let (retry_after, parked) = match retry_at {
            RetryAt::After(at) => (Some(timestamp(at)), false),
            RetryAt::NextRun => (None, true),
        };

        self.conn.execute(
            "UPDATE tasks
             SET status = ?1, status_date = ?2, attempts = attempts + 1,
                 retry_after = ?3, parked = ?4
             WHERE account_id = ?5 AND task_type = ?6",
            params![
                TaskStatus::Incomplete.to_db_string(),
                now(),
                retry_after,
                parked,
                account_id,
                task_type.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn has_deferred_tasks(&self) -> StorageResult<bool> {
        let deferred: bool = self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM tasks WHERE status = ?1 AND parked = 0 AND retry_after > ?2
             )",
            params![TaskStatus::Incomplete.to_db_string(), now()],
            |row| row.get(0),
        )?;
        Ok(deferred)
    }

    fn clear_retry_state(&mut self) -> StorageResult<usize> {
        let cleared = self.conn.execute(
            "UPDATE tasks SET attempts = 0, retry_after = NULL, parked = 0
             WHERE attempts > 0 OR retry_after IS NOT NULL OR parked != 0",
            [],
        )?;
        Ok(cleared)
    }

    fn incomplete_accounts(&self, task_type: TaskType) -> StorageResult<Vec<AccountId>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id FROM tasks WHERE task_type = ?1 AND status = ?2 ORDER BY account_id",
        )?;

        let ids = stmt
            .query_map(
                params![
                    task_type.to_db_string(),
                    TaskStatus::Incomplete.to_db_string()
                ],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    fn count_tasks_by_status(&self, status: TaskStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_tasks(&self, task_type: TaskType, status: TaskStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE task_type = ?1 AND status = ?2",
            params![task_type.to_db_string(), status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_frontier_accounts(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT account_id) FROM tasks WHERE status = ?1",
            params![TaskStatus::Incomplete.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl RelationshipStore for SqliteStorage {
    fn add_edge(
        &mut self,
        source: AccountId,
        target: AccountId,
        kind: EdgeKind,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO relationships (source_id, target_id, kind) VALUES (?1, ?2, ?3)",
            params![source, target, kind.to_db_string()],
        )?;
        Ok(inserted > 0)
    }

    fn add_edges(
        &mut self,
        source: AccountId,
        kind: EdgeKind,
        targets: &[AccountId],
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO relationships (source_id, target_id, kind) VALUES (?1, ?2, ?3)",
            )?;
            for &target in targets {
                inserted += stmt.execute(params![source, target, kind.to_db_string()])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn edges_from(&self, source: AccountId, kind: EdgeKind) -> StorageResult<Vec<AccountId>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id FROM relationships WHERE source_id = ?1 AND kind = ?2 ORDER BY id",
        )?;

        let targets = stmt
            .query_map(params![source, kind.to_db_string()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(targets)
    }

    fn count_edges(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl ContentStore for SqliteStorage {
    fn save_account(&mut self, account: &Account) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO accounts
             (id, screen_name, name, created_at, followers_count, friends_count,
              statuses_count, description, location, lang, is_seed, added)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                account.id,
                account.screen_name,
                account.name,
                account.created_at,
                account.followers_count,
                account.friends_count,
                account.statuses_count,
                account.description,
                account.location,
                account.lang,
                account.is_seed,
                now()
            ],
        )?;
        Ok(inserted > 0)
    }

    fn get_account(&self, account_id: AccountId) -> StorageResult<Option<Account>> {
        let account = self
            .conn
            .query_row(
                "SELECT id, screen_name, name, created_at, followers_count, friends_count,
                 statuses_count, description, location, lang, is_seed
                 FROM accounts WHERE id = ?1",
                params![account_id],
                account_from_row,
            )
            .optional()?;

        Ok(account)
    }

    fn has_profile(&self, account_id: AccountId) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?1)",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn save_posts(&mut self, posts: &[Post]) -> StorageResult<usize> {
        if posts.is_empty() {
            return Ok(0);
        }

        let now = now();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO posts (id, account_id, text, created_at, in_reply_to_id, added)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for post in posts {
                inserted += stmt.execute(params![
                    post.id,
                    post.account_id,
                    post.text,
                    post.created_at,
                    post.in_reply_to_id,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_posts(&self, account_id: AccountId) -> StorageResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, text, created_at, in_reply_to_id
             FROM posts WHERE account_id = ?1 ORDER BY rowid",
        )?;

        let posts = stmt
            .query_map(params![account_id], |row| {
                Ok(Post {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    text: row.get(2)?,
                    created_at: row.get(3)?,
                    in_reply_to_id: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(posts)
    }

    fn has_posts(&self, account_id: AccountId) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE account_id = ?1)",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn accounts_with_posts(&self) -> StorageResult<Vec<AccountId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT account_id FROM posts ORDER BY account_id")?;

        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    fn count_accounts(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_seed_accounts(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE is_seed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_posts(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl RunStore for SqliteStorage {
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now(), config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                RawRun::from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))?
            .into_run()
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                RawRun::from_row,
            )
            .optional()?;

        raw.map(RawRun::into_run).transpose()
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?1 WHERE id = ?2",
            params![status.to_db_string(), run_id],
        )?;
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now(), run_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};

    fn storage() -> SqliteStorage {
        SqliteStorage::new_in_memory().unwrap()
    }

    fn post(id: &str, account_id: AccountId) -> Post {
        Post {
            id: id.to_string(),
            account_id,
            text: format!("post {}", id),
            created_at: Some("2017-09-24T00:00:00Z".to_string()),
            in_reply_to_id: None,
        }
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_enqueue_twice_keeps_one_row_and_status() {
        let mut storage = storage();

        assert!(storage
            .enqueue(1, TaskType::Profile, TaskStatus::Incomplete)
            .unwrap());
        storage
            .set_status(1, TaskType::Profile, TaskStatus::Complete)
            .unwrap();

        assert!(!storage
            .enqueue(1, TaskType::Profile, TaskStatus::Incomplete)
            .unwrap());

        let task = storage.get_task(1, TaskType::Profile).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(
            storage.count_tasks_by_status(TaskStatus::Complete).unwrap()
                + storage.count_tasks_by_status(TaskStatus::Incomplete).unwrap(),
            1
        );
    }

    #[test]
    fn test_enqueue_many_counts_only_new_rows() {
        let mut storage = storage();
        storage
            .enqueue(1, TaskType::Profile, TaskStatus::Complete)
            .unwrap();

        let inserted = storage
            .enqueue_many(&[1, 2], &TaskType::DISCOVERED_TASKS)
            .unwrap();
        assert_eq!(inserted, 3);
        assert!(storage.has_completed_task(1, TaskType::Profile).unwrap());
    }

    #[test]
    fn test_claim_one_marks_pending() {
        let mut storage = storage();
        storage
            .enqueue(5, TaskType::Timeline, TaskStatus::Incomplete)
            .unwrap();

        let task = storage.claim_one(&[TaskType::Timeline]).unwrap().unwrap();
        assert_eq!(task.account_id, 5);
        assert_eq!(task.task_type, TaskType::Timeline);
        assert_eq!(task.status, TaskStatus::Pending);

        let stored = storage.get_task(5, TaskType::Timeline).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);

        // Already pending, nothing else to claim
        assert!(storage.claim_one(&[TaskType::Timeline]).unwrap().is_none());
    }

    #[test]
    fn test_claim_one_respects_task_types() {
        let mut storage = storage();
        storage
            .enqueue(1, TaskType::Profile, TaskStatus::Incomplete)
            .unwrap();
        storage
            .enqueue(2, TaskType::Followers, TaskStatus::Incomplete)
            .unwrap();

        let task = storage
            .claim_one(&[TaskType::Timeline, TaskType::Followers])
            .unwrap()
            .unwrap();
        assert_eq!(task.account_id, 2);

        assert!(storage
            .claim_one(&[TaskType::Timeline, TaskType::Followers])
            .unwrap()
            .is_none());
        assert!(storage.claim_one(&[]).unwrap().is_none());
    }

    #[test]
    fn test_claim_one_skips_complete_tasks() {
        let mut storage = storage();
        storage
            .enqueue(1, TaskType::Friends, TaskStatus::Complete)
            .unwrap();
        assert!(storage.claim_one(&TaskType::SEED_TASKS).unwrap().is_none());
    }

    #[test]
    fn test_claim_batch_respects_limit() {
        let mut storage = storage();
        let ids: Vec<AccountId> = (1..=10).collect();
        storage.enqueue_many(&ids, &[TaskType::Profile]).unwrap();
        storage
            .enqueue(99, TaskType::Timeline, TaskStatus::Incomplete)
            .unwrap();

        let first = storage.claim_batch(TaskType::Profile, 4).unwrap();
        assert_eq!(first.len(), 4);

        let second = storage.claim_batch(TaskType::Profile, 100).unwrap();
        assert_eq!(second.len(), 6);

        let all: HashSet<_> = first.iter().chain(second.iter()).copied().collect();
        assert_eq!(all.len(), 10);
        assert!(!all.contains(&99));

        assert!(storage.claim_batch(TaskType::Profile, 5).unwrap().is_empty());
        assert!(storage.claim_batch(TaskType::Timeline, 0).unwrap().is_empty());
    }

    #[test]
    fn test_set_status_str_ignores_unknown_values() {
        let mut storage = storage();
        storage
            .enqueue(1, TaskType::Profile, TaskStatus::Incomplete)
            .unwrap();

        assert!(!storage.set_status_str(1, "profile", "finished").unwrap());
        assert!(!storage.set_status_str(1, "avatar", "complete").unwrap());
        assert_eq!(
            storage.get_task(1, TaskType::Profile).unwrap().unwrap().status,
            TaskStatus::Incomplete
        );

        assert!(storage.set_status_str(1, "PROFILE", "Complete").unwrap());
        assert!(storage.has_completed_task(1, TaskType::Profile).unwrap());
    }

    #[test]
    fn test_has_completed_task_for_missing_task() {
        let storage = storage();
        assert!(!storage.has_completed_task(404, TaskType::Timeline).unwrap());
    }

    #[test]
    fn test_reset_pending() {
        let mut storage = storage();
        storage
            .enqueue_many(&[1, 2, 3], &[TaskType::Timeline])
            .unwrap();
        storage.claim_batch(TaskType::Timeline, 2).unwrap();
        storage
            .set_status(3, TaskType::Timeline, TaskStatus::Complete)
            .unwrap();

        let pending = storage.count_tasks_by_status(TaskStatus::Pending).unwrap();
        let reset = storage.reset_pending().unwrap();
        assert_eq!(reset as u64, pending);
        assert_eq!(storage.count_tasks_by_status(TaskStatus::Pending).unwrap(), 0);
        assert!(storage.has_completed_task(3, TaskType::Timeline).unwrap());
    }

    #[test]
    fn test_frontier_counts_accounts_not_tasks() {
        let mut storage = storage();
        storage
            .enqueue_many(&[1, 2], &TaskType::DISCOVERED_TASKS)
            .unwrap();
        storage
            .set_status(2, TaskType::Profile, TaskStatus::Complete)
            .unwrap();
        storage
            .set_status(2, TaskType::Timeline, TaskStatus::Complete)
            .unwrap();

        assert_eq!(storage.count_frontier_accounts().unwrap(), 1);
        assert_eq!(
            storage.incomplete_accounts(TaskType::Timeline).unwrap(),
            vec![1]
        );
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut storage = storage();
        assert!(storage.add_edge(1, 2, EdgeKind::FollowedBy).unwrap());
        assert!(!storage.add_edge(1, 2, EdgeKind::FollowedBy).unwrap());
        assert!(storage.add_edge(1, 2, EdgeKind::Follows).unwrap());

        assert_eq!(storage.count_edges().unwrap(), 2);
        assert_eq!(
            storage.edges_from(1, EdgeKind::FollowedBy).unwrap(),
            vec![2]
        );
        assert!(storage.edges_from(2, EdgeKind::FollowedBy).unwrap().is_empty());
    }

    #[test]
    fn test_add_edges_batch() {
        let mut storage = storage();
        storage.add_edge(1, 3, EdgeKind::Follows).unwrap();

        let inserted = storage.add_edges(1, EdgeKind::Follows, &[2, 3, 4, 4]).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(
            storage.edges_from(1, EdgeKind::Follows).unwrap(),
            vec![3, 2, 4]
        );
    }

    #[test]
    fn test_duplicate_post_is_noop() {
        let mut storage = storage();
        assert_eq!(storage.save_posts(&[post("1", 9), post("2", 9)]).unwrap(), 2);
        assert_eq!(storage.count_posts().unwrap(), 2);

        let mut changed = post("1", 9);
        changed.text = "edited".to_string();
        assert_eq!(storage.save_posts(&[changed, post("3", 9)]).unwrap(), 1);
        assert_eq!(storage.count_posts().unwrap(), 3);

        let posts = storage.get_posts(9).unwrap();
        assert_eq!(posts[0].text, "post 1");
        assert!(storage.has_posts(9).unwrap());
        assert!(!storage.has_posts(10).unwrap());
        assert_eq!(storage.accounts_with_posts().unwrap(), vec![9]);
    }

    #[test]
    fn test_save_account_keeps_first_profile() {
        let mut storage = storage();
        let mut account = Account::with_id(3);
        account.screen_name = Some("first".to_string());
        account.is_seed = true;
        assert!(storage.save_account(&account).unwrap());

        account.screen_name = Some("second".to_string());
        assert!(!storage.save_account(&account).unwrap());

        let loaded = storage.get_account(3).unwrap().unwrap();
        assert_eq!(loaded.screen_name.as_deref(), Some("first"));
        assert!(loaded.is_seed);
        assert!(storage.has_profile(3).unwrap());
        assert!(!storage.has_profile(4).unwrap());
        assert_eq!(storage.count_seed_accounts().unwrap(), 1);
    }

    #[test]
    fn test_runs() {
        let mut storage = storage();
        assert!(storage.get_latest_run().unwrap().is_none());

        let run_id = storage.create_run("hash").unwrap();
        assert!(run_id > 0);
        assert_eq!(storage.get_run(run_id).unwrap().status, RunStatus::Running);

        storage.finish_run(run_id, RunStatus::Completed).unwrap();
        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());

        assert!(matches!(
            storage.get_run(run_id + 1),
            Err(StorageError::RunNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_run_status_is_corrupt() {
        let storage = storage();
        storage
            .conn
            .execute(
                "INSERT INTO runs (started_at, config_hash, status) VALUES ('now', 'hash', 'paused')",
                [],
            )
            .unwrap();

        assert!(matches!(
            storage.get_latest_run(),
            Err(StorageError::CorruptValue { column: "runs.status", .. })
        ));
        assert!(matches!(
            storage.get_run(1),
            Err(StorageError::CorruptValue { .. })
        ));
    }

    #[test]
    fn test_release_failed_defers_claims() {
        let mut storage = storage();
        storage.enqueue_many(&[1], &[TaskType::Timeline]).unwrap();
        storage.claim_one(&[TaskType::Timeline]).unwrap().unwrap();

        let later = Utc::now() + chrono::Duration::hours(1);
        storage
            .release_failed(1, TaskType::Timeline, RetryAt::After(later))
            .unwrap();

        let task = storage.get_task(1, TaskType::Timeline).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Incomplete);
        assert_eq!(storage.task_attempts(1, TaskType::Timeline).unwrap(), 1);
        assert!(storage.claim_one(&[TaskType::Timeline]).unwrap().is_none());
        assert!(storage.has_deferred_tasks().unwrap());

        // Once the delay has passed the task is claimable again
        let earlier = Utc::now() - chrono::Duration::seconds(1);
        storage
            .release_failed(1, TaskType::Timeline, RetryAt::After(earlier))
            .unwrap();
        assert!(!storage.has_deferred_tasks().unwrap());
        assert!(storage.claim_one(&[TaskType::Timeline]).unwrap().is_some());
        assert_eq!(storage.task_attempts(1, TaskType::Timeline).unwrap(), 2);
    }

    #[test]
    fn test_claim_batch_skips_deferred_tasks() {
        let mut storage = storage();
        storage.enqueue_many(&[1, 2], &[TaskType::Profile]).unwrap();
        storage
            .release_failed(
                1,
                TaskType::Profile,
                RetryAt::After(Utc::now() + chrono::Duration::hours(1)),
            )
            .unwrap();

        assert_eq!(storage.claim_batch(TaskType::Profile, 10).unwrap(), vec![2]);
    }

    #[test]
    fn test_parked_task_waits_for_next_run() {
        let mut storage = storage();
        storage.enqueue_many(&[1], &[TaskType::Friends]).unwrap();
        storage
            .release_failed(1, TaskType::Friends, RetryAt::NextRun)
            .unwrap();

        assert!(storage.claim_one(&TaskType::SEED_TASKS).unwrap().is_none());
        assert!(!storage.has_deferred_tasks().unwrap());
        assert_eq!(storage.count_tasks_by_status(TaskStatus::Incomplete).unwrap(), 1);

        assert_eq!(storage.clear_retry_state().unwrap(), 1);
        assert_eq!(storage.task_attempts(1, TaskType::Friends).unwrap(), 0);
        assert!(storage.claim_one(&TaskType::SEED_TASKS).unwrap().is_some());
    }

    #[test]
    fn test_task_attempts_for_missing_task() {
        let storage = storage();
        assert_eq!(storage.task_attempts(9, TaskType::Profile).unwrap(), 0);
    }

    /// Opens `count` independent connections to one database file
    fn open_connections(path: &Path, count: usize) -> Vec<SqliteStorage> {
        (0..count).map(|_| SqliteStorage::new(path).unwrap()).collect()
    }

    fn claim_concurrently(claimers: Vec<SqliteStorage>) -> Vec<Option<Task>> {
        let barrier = Arc::new(Barrier::new(claimers.len()));
        let handles: Vec<_> = claimers
            .into_iter()
            .map(|mut storage| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    storage.claim_one(&TaskType::SEED_TASKS).unwrap()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_concurrent_claims_across_connections_fewer_claimers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let mut setup = SqliteStorage::new(&path).unwrap();
        let ids: Vec<AccountId> = (1..=20).collect();
        setup.enqueue_many(&ids, &[TaskType::Timeline]).unwrap();

        let results = claim_concurrently(open_connections(&path, 8));
        let claimed: Vec<_> = results.into_iter().flatten().collect();
        let distinct: HashSet<_> = claimed.iter().map(|t| t.account_id).collect();

        assert_eq!(claimed.len(), 8);
        assert_eq!(distinct.len(), 8);
        assert_eq!(setup.count_tasks_by_status(TaskStatus::Pending).unwrap(), 8);
    }

    #[test]
    fn test_concurrent_claims_across_connections_more_claimers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let mut setup = SqliteStorage::new(&path).unwrap();
        let ids: Vec<AccountId> = (1..=5).collect();
        setup.enqueue_many(&ids, &[TaskType::Friends]).unwrap();

        let results = claim_concurrently(open_connections(&path, 12));
        let claimed: Vec<_> = results.into_iter().flatten().collect();
        let distinct: HashSet<_> = claimed.iter().map(|t| t.account_id).collect();

        assert_eq!(claimed.len(), 5);
        assert_eq!(distinct.len(), 5);
        assert_eq!(setup.count_tasks_by_status(TaskStatus::Incomplete).unwrap(), 0);
    }
}
