//! Work scheduling on top of the task store
//!
//! The scheduler decides which tasks an account needs, hands out claimed work to
//! drivers and records their outcomes. It never blocks: every method takes the
//! storage lock for a single short store operation and releases it before
//! returning.

use crate::state::{Account, AccountId, EdgeKind, RetryAt, Task, TaskStatus, TaskType};
use crate::storage::{lock, ContentStore, RelationshipStore, SharedStorage, TaskStore};
use crate::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Longest delay between two attempts at one task
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// How soon and how often a transiently failed task is retried within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures per run after which a task waits for the next run
    pub max_attempts: u32,

    /// Delay after the first failure; doubles with each further failure
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay imposed after the given number of failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1 << exponent)
            .min(MAX_RETRY_BACKOFF)
    }

    /// When a task that has failed `failures` times may be claimed again
    pub fn retry_at(&self, failures: u32, now: DateTime<Utc>) -> RetryAt {
        if failures >= self.max_attempts {
            return RetryAt::NextRun;
        }

        let delay = chrono::Duration::from_std(self.backoff(failures))
            .unwrap_or_else(|_| chrono::Duration::zero());
        RetryAt::After(now + delay)
    }
}

/// A unit of claimed work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A batch of claimed PROFILE tasks, fetched together
    Profiles(Vec<AccountId>),

    /// A single claimed task
    Task(Task),
}

impl WorkItem {
    /// Number of tasks this item covers
    pub fn task_count(&self) -> usize {
        match self {
            Self::Profiles(ids) => ids.len(),
            Self::Task(_) => 1,
        }
    }
}

/// Hands out crawl work and records outcomes
#[derive(Clone)]
pub struct Scheduler {
    storage: SharedStorage,
    profile_batch_size: usize,
    retry_policy: RetryPolicy,
}

impl Scheduler {
    /// Creates a scheduler over a shared store
    ///
    /// A `profile_batch_size` of 1 turns off PROFILE batching; every task type is then
    /// claimed one at a time.
    pub fn new(storage: SharedStorage, profile_batch_size: usize) -> Self {
        Self {
            storage,
            profile_batch_size: profile_batch_size.max(1),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the default retry policy
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// The store this scheduler works on
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Enqueues the full seed task set for each id
    ///
    /// Returns the number of tasks that did not exist yet.
    pub fn seed(&self, ids: &[AccountId]) -> Result<usize> {
        let added = lock(&self.storage)?.enqueue_many(ids, &TaskType::SEED_TASKS)?;
        tracing::debug!("Seeded {} accounts ({} new tasks)", ids.len(), added);
        Ok(added)
    }

    /// Loads seed source records
    ///
    /// Records carrying profile data are stored as seed profiles and their PROFILE
    /// task starts out complete. Every record gets the remaining seed tasks.
    pub fn ingest_source_records(&self, records: &[Account]) -> Result<usize> {
        let mut storage = lock(&self.storage)?;
        let mut profiles = 0;

        for record in records {
            let profile_status = if record.has_profile_data() {
                let mut account = record.clone();
                account.is_seed = true;
                if storage.save_account(&account)? {
                    profiles += 1;
                }
                TaskStatus::Complete
            } else {
                TaskStatus::Incomplete
            };

            storage.enqueue(record.id, TaskType::Profile, profile_status)?;
            for task_type in TaskType::SINGLE_TASKS {
                storage.enqueue(record.id, task_type, TaskStatus::Incomplete)?;
            }
        }

        tracing::debug!(
            "Ingested {} source records ({} new profiles)",
            records.len(),
            profiles
        );
        Ok(records.len())
    }

    /// Enqueues PROFILE and TIMELINE for accounts found through a relationship
    ///
    /// Discovered accounts never get FOLLOWERS or FRIENDS tasks, which keeps the crawl
    /// one hop deep.
    pub fn expand_frontier(&self, discovered: &[AccountId]) -> Result<usize> {
        if discovered.is_empty() {
            return Ok(0);
        }
        let added = lock(&self.storage)?.enqueue_many(discovered, &TaskType::DISCOVERED_TASKS)?;
        Ok(added)
    }

    /// Returns every PENDING task to INCOMPLETE and forgets earlier retry state
    ///
    /// Must run once at startup, before any worker claims. Any PENDING row at that
    /// point belongs to a process that is gone; the store is single-owner. Tasks
    /// parked by an earlier run become claimable again.
    pub fn recover_stale_claims(&self) -> Result<usize> {
        let mut storage = lock(&self.storage)?;
        let reset = storage.reset_pending()?;
        if reset > 0 {
            tracing::info!("Recovered {} stale claims from an earlier run", reset);
        }

        let cleared = storage.clear_retry_state()?;
        if cleared > 0 {
            tracing::info!("Cleared retry state of {} tasks", cleared);
        }
        Ok(reset)
    }

    /// Claims the next unit of work, or None when nothing is claimable
    pub fn next_work(&self) -> Result<Option<WorkItem>> {
        let mut storage = lock(&self.storage)?;

        if self.profile_batch_size == 1 {
            return Ok(storage.claim_one(&TaskType::SEED_TASKS)?.map(WorkItem::Task));
        }

        let profiles = storage.claim_batch(TaskType::Profile, self.profile_batch_size)?;
        if !profiles.is_empty() {
            return Ok(Some(WorkItem::Profiles(profiles)));
        }

        Ok(storage
            .claim_one(&TaskType::SINGLE_TASKS)?
            .map(WorkItem::Task))
    }

    /// Records a successful (or permanently failed) task
    pub fn complete(&self, account_id: AccountId, task_type: TaskType) -> Result<()> {
        lock(&self.storage)?.set_status(account_id, task_type, TaskStatus::Complete)?;
        Ok(())
    }

    /// Records a transient failure
    ///
    /// The task returns to INCOMPLETE behind a delay that grows with every failure.
    /// Once it has failed `max_attempts` times in this run it is parked until the
    /// next startup.
    pub fn retry(&self, account_id: AccountId, task_type: TaskType) -> Result<RetryAt> {
        let mut storage = lock(&self.storage)?;
        let failures = storage.task_attempts(account_id, task_type)? + 1;
        let retry_at = self.retry_policy.retry_at(failures, Utc::now());
        storage.release_failed(account_id, task_type, retry_at)?;
        Ok(retry_at)
    }

    /// Returns true if a failed task becomes claimable again later in this run
    pub fn has_deferred_work(&self) -> Result<bool> {
        Ok(lock(&self.storage)?.has_deferred_tasks()?)
    }

    /// Completes INCOMPLETE tasks whose results are already stored
    ///
    /// Used when migrating a database whose content was collected before task rows
    /// tracked it. Returns the number of tasks completed.
    pub fn reconcile_completed(&self) -> Result<usize> {
        let mut storage = lock(&self.storage)?;
        let mut reconciled = 0;

        for task_type in TaskType::SEED_TASKS {
            for account_id in storage.incomplete_accounts(task_type)? {
                let done = match task_type.edge_kind() {
                    Some(kind) => has_edges(&*storage, account_id, kind)?,
                    None if task_type == TaskType::Profile => storage.has_profile(account_id)?,
                    None => storage.has_posts(account_id)?,
                };

                if done {
                    storage.set_status(account_id, task_type, TaskStatus::Complete)?;
                    reconciled += 1;
                }
            }
        }

        tracing::info!("Reconciled {} tasks against stored content", reconciled);
        Ok(reconciled)
    }
}

/// Seeds are the only accounts with relationship tasks
pub(crate) fn is_seed_account<S: TaskStore>(storage: &S, account_id: AccountId) -> Result<bool> {
    Ok(storage.get_task(account_id, TaskType::Followers)?.is_some()
        || storage.get_task(account_id, TaskType::Friends)?.is_some())
}

fn has_edges<S: RelationshipStore>(storage: &S, account_id: AccountId, kind: EdgeKind) -> Result<bool> {
    Ok(!storage.edges_from(account_id, kind)?.is_empty())
}
