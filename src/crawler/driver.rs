//! Crawl driver - the per-worker control loop
//!
//! A driver repeatedly claims work from the [`Scheduler`], performs it through the
//! [`SocialApi`] and reports the outcome:
//!
//! | Result | Task becomes |
//! |--------|--------------|
//! | Success, or data already stored | `Complete` |
//! | Permanent API failure (unavailable, forbidden) | `Complete`, no data |
//! | Transient API failure | `Incomplete`, claimable again after a backoff |
//! | Storage failure | left `Pending`; the error ends the worker |

use crate::crawler::api::SocialApi;
use crate::crawler::scheduler::{is_seed_account, Scheduler, WorkItem};
use crate::state::{AccountId, EdgeKind, RetryAt, Task, TaskType};
use crate::storage::{lock, ContentStore, RelationshipStore};
use crate::{Result, TrawlError};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long an idle worker waits before looking for work again while others are busy
/// or a failed task is backing off
const IDLE_POLL: Duration = Duration::from_millis(200);

/// How a single task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Fetched and stored
    Completed,

    /// Data was already stored; nothing fetched
    Skipped,

    /// Permanently unavailable; completed without data
    Unavailable,

    /// Transient failure; returned to the queue
    Retried,
}

/// Counts of what a crawl (or one worker) did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub completed: u64,
    pub skipped: u64,
    pub unavailable: u64,
    pub retried: u64,
    pub profiles_saved: u64,
    pub posts_saved: u64,
    pub edges_saved: u64,
    pub tasks_discovered: u64,
}

impl CrawlReport {
    /// Counts one task outcome
    pub fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::Unavailable => self.unavailable += 1,
            TaskOutcome::Retried => self.retried += 1,
        }
    }

    /// Adds another report's counts to this one
    pub fn merge(&mut self, other: &CrawlReport) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.unavailable += other.unavailable;
        self.retried += other.retried;
        self.profiles_saved += other.profiles_saved;
        self.posts_saved += other.posts_saved;
        self.edges_saved += other.edges_saved;
        self.tasks_discovered += other.tasks_discovered;
    }

    /// Total number of task outcomes recorded
    pub fn tasks_processed(&self) -> u64 {
        self.completed + self.skipped + self.unavailable + self.retried
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks ({} completed, {} skipped, {} unavailable, {} retried); \
             saved {} profiles, {} posts, {} edges; {} new tasks discovered",
            self.tasks_processed(),
            self.completed,
            self.skipped,
            self.unavailable,
            self.retried,
            self.profiles_saved,
            self.posts_saved,
            self.edges_saved,
            self.tasks_discovered
        )
    }
}

/// State shared by every worker of one crawl
#[derive(Debug, Default)]
pub struct WorkerSignals {
    in_flight: AtomicUsize,
    halted: AtomicBool,
}

impl WorkerSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops every worker from claiming further work
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// Marks a worker as busy until dropped, including on panic
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One crawl worker
pub struct CrawlDriver {
    worker_id: usize,
    scheduler: Scheduler,
    api: Arc<dyn SocialApi>,
    progress_interval: u64,
}

impl CrawlDriver {
    pub fn new(
        worker_id: usize,
        scheduler: Scheduler,
        api: Arc<dyn SocialApi>,
        progress_interval: u64,
    ) -> Self {
        Self {
            worker_id,
            scheduler,
            api,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Processes work until nothing is claimable, no other worker is busy and no
    /// failed task is waiting to be retried
    ///
    /// A worker that runs dry while others are still processing waits and looks
    /// again, since their results may enqueue new tasks.
    pub async fn run(&self, signals: Arc<WorkerSignals>) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let started = Instant::now();
        let mut units = 0u64;

        while !signals.is_halted() {
            let claim = InFlight::enter(&signals.in_flight);

            let claimed = match self.scheduler.next_work() {
                Ok(claimed) => claimed,
                Err(e) => {
                    signals.halt();
                    return Err(e);
                }
            };

            let Some(item) = claimed else {
                drop(claim);
                let deferred = match self.scheduler.has_deferred_work() {
                    Ok(deferred) => deferred,
                    Err(e) => {
                        signals.halt();
                        return Err(e);
                    }
                };
                if !deferred && signals.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };

            let result = self.process(item, &mut report).await;
            drop(claim);

            if let Err(e) = result {
                tracing::error!("Worker {} stopping on storage failure: {}", self.worker_id, e);
                signals.halt();
                return Err(e);
            }

            units += 1;
            if units % self.progress_interval == 0 {
                let minutes = started.elapsed().as_secs_f64() / 60.0;
                tracing::info!(
                    "Worker {}: {} units, {} tasks processed, {:.1} tasks/min",
                    self.worker_id,
                    units,
                    report.tasks_processed(),
                    report.tasks_processed() as f64 / minutes.max(f64::EPSILON)
                );
            }
        }

        tracing::debug!("Worker {} finished: {}", self.worker_id, report);
        Ok(report)
    }

    /// Performs one claimed unit of work and records its outcome
    pub async fn process(&self, item: WorkItem, report: &mut CrawlReport) -> Result<()> {
        match item {
            WorkItem::Profiles(ids) => self.process_profiles(ids, report).await,
            WorkItem::Task(task) => self.process_task(task, report).await,
        }
    }

    async fn process_task(&self, task: Task, report: &mut CrawlReport) -> Result<()> {
        tracing::debug!("Worker {} processing {}", self.worker_id, task);

        let result = match task.task_type {
            TaskType::Profile => self.fetch_profile(task.account_id, report).await,
            TaskType::Timeline => self.fetch_timeline(task.account_id, report).await,
            TaskType::Followers => {
                self.fetch_relationships(task.account_id, EdgeKind::FollowedBy, report)
                    .await
            }
            TaskType::Friends => {
                self.fetch_relationships(task.account_id, EdgeKind::Follows, report)
                    .await
            }
        };

        let outcome = self.settle(task.account_id, task.task_type, result)?;
        report.record(outcome);
        Ok(())
    }

    /// Turns a task result into a status transition
    fn settle(
        &self,
        account_id: AccountId,
        task_type: TaskType,
        result: Result<TaskOutcome>,
    ) -> Result<TaskOutcome> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(TrawlError::Api(e)) if e.is_permanent() => {
                tracing::debug!("{}:{} permanently failed: {}", account_id, task_type, e);
                TaskOutcome::Unavailable
            }
            Err(TrawlError::Api(e)) => {
                match self.scheduler.retry(account_id, task_type)? {
                    RetryAt::After(at) => tracing::warn!(
                        "{}:{} failed, retrying after {}: {}",
                        account_id,
                        task_type,
                        at,
                        e
                    ),
                    RetryAt::NextRun => tracing::warn!(
                        "{}:{} keeps failing, leaving it for the next run: {}",
                        account_id,
                        task_type,
                        e
                    ),
                }
                return Ok(TaskOutcome::Retried);
            }
            Err(e) => return Err(e),
        };

        self.scheduler.complete(account_id, task_type)?;
        Ok(outcome)
    }

    async fn process_profiles(&self, ids: Vec<AccountId>, report: &mut CrawlReport) -> Result<()> {
        tracing::debug!("Worker {} processing {} profiles", self.worker_id, ids.len());

        let mut missing = Vec::with_capacity(ids.len());
        {
            let storage = lock(self.scheduler.storage())?;
            for &id in &ids {
                if storage.has_profile(id)? {
                    report.record(TaskOutcome::Skipped);
                } else {
                    missing.push(id);
                }
            }
        }

        for &id in &ids {
            if !missing.contains(&id) {
                self.scheduler.complete(id, TaskType::Profile)?;
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let accounts = match self.api.fetch_profiles(&missing).await {
            Ok(accounts) => accounts,
            Err(e) => {
                for &id in &missing {
                    let outcome =
                        self.settle(id, TaskType::Profile, Err(TrawlError::Api(e.clone())))?;
                    report.record(outcome);
                }
                return Ok(());
            }
        };

        let returned: HashSet<AccountId> = {
            let mut storage = lock(self.scheduler.storage())?;
            let mut returned = HashSet::with_capacity(accounts.len());
            for mut account in accounts {
                if !missing.contains(&account.id) {
                    continue;
                }
                account.is_seed = is_seed_account(&*storage, account.id)?;
                if storage.save_account(&account)? {
                    report.profiles_saved += 1;
                }
                returned.insert(account.id);
            }
            returned
        };

        for id in missing {
            self.scheduler.complete(id, TaskType::Profile)?;
            if returned.contains(&id) {
                report.record(TaskOutcome::Completed);
            } else {
                tracing::debug!("Profile {} not returned, treating as unavailable", id);
                report.record(TaskOutcome::Unavailable);
            }
        }

        Ok(())
    }

    async fn fetch_profile(&self, id: AccountId, report: &mut CrawlReport) -> Result<TaskOutcome> {
        let stored = lock(self.scheduler.storage())?.has_profile(id)?;
        if stored {
            return Ok(TaskOutcome::Skipped);
        }

        let mut account = self.api.fetch_profile(id).await?;
        let saved = {
            let mut storage = lock(self.scheduler.storage())?;
            account.is_seed = is_seed_account(&*storage, id)?;
            storage.save_account(&account)?
        };
        if saved {
            report.profiles_saved += 1;
        }

        Ok(TaskOutcome::Completed)
    }

    async fn fetch_timeline(&self, id: AccountId, report: &mut CrawlReport) -> Result<TaskOutcome> {
        let stored = lock(self.scheduler.storage())?.has_posts(id)?;
        if stored {
            return Ok(TaskOutcome::Skipped);
        }

        let posts = self.api.fetch_timeline(id).await?;
        let saved = lock(self.scheduler.storage())?.save_posts(&posts)?;
        report.posts_saved += saved as u64;
        tracing::debug!("Timeline {}: {} posts ({} new)", id, posts.len(), saved);

        Ok(TaskOutcome::Completed)
    }

    async fn fetch_relationships(
        &self,
        id: AccountId,
        kind: EdgeKind,
        report: &mut CrawlReport,
    ) -> Result<TaskOutcome> {
        let existing = lock(self.scheduler.storage())?.edges_from(id, kind)?;
        if !existing.is_empty() {
            // A previous attempt stored the edges but may have died before enqueueing
            report.tasks_discovered += self.scheduler.expand_frontier(&existing)? as u64;
            return Ok(TaskOutcome::Skipped);
        }

        let targets = match kind {
            EdgeKind::FollowedBy => self.api.fetch_followers(id).await?,
            EdgeKind::Follows => self.api.fetch_friends(id).await?,
        };

        let saved = lock(self.scheduler.storage())?.add_edges(id, kind, &targets)?;
        report.edges_saved += saved as u64;
        report.tasks_discovered += self.scheduler.expand_frontier(&targets)? as u64;
        tracing::debug!("{} {}: {} accounts", id, kind, targets.len());

        Ok(TaskOutcome::Completed)
    }
}
