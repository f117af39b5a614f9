//! Storage traits and error types
//!
//! The store is split along the lines of what each caller needs: the task queue,
//! the relationship graph, collected content, and run bookkeeping. `Storage` ties
//! them together for code that wants the whole database.

use crate::state::{Account, AccountId, EdgeKind, Post, RetryAt, Task, TaskStatus, TaskType};
use crate::storage::{RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt {column} value in database: {value}")]
    CorruptValue { column: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The durable task queue
///
/// Exactly one row exists per `(account, task type)`. Claiming moves a row from
/// `Incomplete` to `Pending` atomically, so no two claimers ever receive the same
/// task.
///
/// An `Incomplete` task is claimable unless a failed attempt deferred it: either
/// until a `retry_after` time, or (once parked) until the next startup.
pub trait TaskStore {
    /// Inserts a task if absent
    ///
    /// Returns false (and changes nothing) when the task already exists.
    fn enqueue(
        &mut self,
        account_id: AccountId,
        task_type: TaskType,
        initial_status: TaskStatus,
    ) -> StorageResult<bool>;

    /// Enqueues every task type for every account as `Incomplete` in one transaction
    ///
    /// Returns the number of rows actually inserted.
    fn enqueue_many(
        &mut self,
        account_ids: &[AccountId],
        task_types: &[TaskType],
    ) -> StorageResult<usize>;

    /// Claims one random claimable task whose type is in `task_types`
    fn claim_one(&mut self, task_types: &[TaskType]) -> StorageResult<Option<Task>>;

    /// Claims up to `limit` random claimable tasks of a single type
    fn claim_batch(&mut self, task_type: TaskType, limit: usize)
        -> StorageResult<Vec<AccountId>>;

    /// Sets the status of a task
    fn set_status(
        &mut self,
        account_id: AccountId,
        task_type: TaskType,
        status: TaskStatus,
    ) -> StorageResult<()>;

    /// Sets the status of a task from loosely typed input
    ///
    /// Unknown task types or statuses are ignored and reported as `Ok(false)`.
    fn set_status_str(
        &mut self,
        account_id: AccountId,
        task_type: &str,
        status: &str,
    ) -> StorageResult<bool>;

    /// Returns true if the task exists and is `Complete`
    fn has_completed_task(&self, account_id: AccountId, task_type: TaskType)
        -> StorageResult<bool>;

    /// Gets a task by identity
    fn get_task(&self, account_id: AccountId, task_type: TaskType) -> StorageResult<Option<Task>>;

    /// Returns every `Pending` task to `Incomplete` (stale claim recovery)
    fn reset_pending(&mut self) -> StorageResult<usize>;

    /// Number of failed attempts recorded for a task in the current run
    fn task_attempts(&self, account_id: AccountId, task_type: TaskType) -> StorageResult<u32>;

    /// Returns a failed task to `Incomplete` and records the attempt
    fn release_failed(
        &mut self,
        account_id: AccountId,
        task_type: TaskType,
        retry_at: RetryAt,
    ) -> StorageResult<()>;

    /// Returns true if some `Incomplete` task is waiting out a retry delay
    ///
    /// Parked tasks do not count; nothing in this run will claim them.
    fn has_deferred_tasks(&self) -> StorageResult<bool>;

    /// Forgets attempt counts, retry delays and parking from earlier runs
    fn clear_retry_state(&mut self) -> StorageResult<usize>;

    /// Lists accounts with an `Incomplete` task of the given type
    fn incomplete_accounts(&self, task_type: TaskType) -> StorageResult<Vec<AccountId>>;

    /// Counts tasks in a status across all types
    fn count_tasks_by_status(&self, status: TaskStatus) -> StorageResult<u64>;

    /// Counts tasks of one type in one status
    fn count_tasks(&self, task_type: TaskType, status: TaskStatus) -> StorageResult<u64>;

    /// Counts accounts with at least one `Incomplete` task
    fn count_frontier_accounts(&self) -> StorageResult<u64>;
}

/// Directed, deduplicated relationship edges
pub trait RelationshipStore {
    /// Inserts an edge; duplicates are ignored and reported as `Ok(false)`
    fn add_edge(
        &mut self,
        source: AccountId,
        target: AccountId,
        kind: EdgeKind,
    ) -> StorageResult<bool>;

    /// Inserts edges from one source in a single transaction
    ///
    /// Returns the number of edges that were new.
    fn add_edges(
        &mut self,
        source: AccountId,
        kind: EdgeKind,
        targets: &[AccountId],
    ) -> StorageResult<usize>;

    /// Gets all targets of `kind` edges leaving `source`
    fn edges_from(&self, source: AccountId, kind: EdgeKind) -> StorageResult<Vec<AccountId>>;

    /// Counts the total number of edges
    fn count_edges(&self) -> StorageResult<u64>;
}

/// Account profiles and timeline posts
pub trait ContentStore {
    /// Saves a profile; an existing profile is left untouched and `Ok(false)` returned
    fn save_account(&mut self, account: &Account) -> StorageResult<bool>;

    /// Gets a profile by id
    fn get_account(&self, account_id: AccountId) -> StorageResult<Option<Account>>;

    /// Returns true if a profile row exists for the account
    fn has_profile(&self, account_id: AccountId) -> StorageResult<bool>;

    /// Saves a batch of posts in one transaction, skipping ids already stored
    ///
    /// Returns the number of posts that were new.
    fn save_posts(&mut self, posts: &[Post]) -> StorageResult<usize>;

    /// Gets all posts owned by an account in the order they were stored
    fn get_posts(&self, account_id: AccountId) -> StorageResult<Vec<Post>>;

    /// Returns true if any post is stored for the account
    fn has_posts(&self, account_id: AccountId) -> StorageResult<bool>;

    /// Lists accounts that own at least one post
    fn accounts_with_posts(&self) -> StorageResult<Vec<AccountId>>;

    /// Counts stored profiles
    fn count_accounts(&self) -> StorageResult<u64>;

    /// Counts stored seed profiles
    fn count_seed_accounts(&self) -> StorageResult<u64>;

    /// Counts stored posts
    fn count_posts(&self) -> StorageResult<u64>;
}

/// Crawl run bookkeeping
pub trait RunStore {
    /// Creates a new crawl run and returns its id
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    /// Marks a run as finished with the given status and a finish timestamp
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;
}

/// The complete storage backend
pub trait Storage: TaskStore + RelationshipStore + ContentStore + RunStore {}

impl<T> Storage for T where T: TaskStore + RelationshipStore + ContentStore + RunStore {}
