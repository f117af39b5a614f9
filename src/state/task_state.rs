/// Task definitions for tracking crawl progress
///
/// Every account in the crawl owns one task row per kind of work it needs. A task
/// moves `Incomplete -> Pending -> Complete`, or back to `Incomplete` when the
/// attempt fails.
use crate::state::account::{AccountId, EdgeKind};
use chrono::{DateTime, Utc};
use std::fmt;

/// The kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskType {
    /// Fetch the account's profile metadata
    Profile,

    /// Fetch the account's full post history
    Timeline,

    /// Fetch the ids of accounts following this account
    Followers,

    /// Fetch the ids of accounts this account follows
    Friends,
}

impl TaskType {
    /// Tasks created for a seed (primary) account
    pub const SEED_TASKS: [TaskType; 4] = [
        TaskType::Profile,
        TaskType::Timeline,
        TaskType::Followers,
        TaskType::Friends,
    ];

    /// Tasks created for an account discovered through a relationship
    pub const DISCOVERED_TASKS: [TaskType; 2] = [TaskType::Profile, TaskType::Timeline];

    /// Task types that are claimed one at a time when profiles are batched
    pub const SINGLE_TASKS: [TaskType; 3] =
        [TaskType::Timeline, TaskType::Followers, TaskType::Friends];

    /// Converts the task type to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Timeline => "timeline",
            Self::Followers => "followers",
            Self::Friends => "friends",
        }
    }

    /// Parses a task type, ignoring case and surrounding whitespace
    ///
    /// Returns None if the string doesn't match any known task type.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" => Some(Self::Profile),
            "timeline" => Some(Self::Timeline),
            "followers" => Some(Self::Followers),
            "friends" => Some(Self::Friends),
            _ => None,
        }
    }

    /// The relationship kind recorded by this task, if it is a relationship task
    ///
    /// Followers of `A` are stored as `A followed_by X`; friends as `A follows X`.
    pub fn edge_kind(&self) -> Option<EdgeKind> {
        match self {
            Self::Followers => Some(EdgeKind::FollowedBy),
            Self::Friends => Some(EdgeKind::Follows),
            Self::Profile | Self::Timeline => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Progress of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    /// Not yet done and not claimed by any worker
    Incomplete,

    /// Claimed by a worker; no other worker may take it
    Pending,

    /// Done, either with data or as a known-unavailable account
    Complete,
}

impl TaskStatus {
    /// Returns true if a worker may claim a task in this status
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Incomplete)
    }

    /// Returns true if no further work will be done for the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Pending => "pending",
            Self::Complete => "complete",
        }
    }

    /// Parses a status, ignoring case and surrounding whitespace
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incomplete" => Some(Self::Incomplete),
            "pending" => Some(Self::Pending),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    /// Returns all statuses
    pub fn all_statuses() -> [Self; 3] {
        [Self::Incomplete, Self::Pending, Self::Complete]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A task row as stored in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub account_id: AccountId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub status_date: String,
    pub added: String,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.task_type)
    }
}

/// When a task returned to `Incomplete` after a failure may be claimed again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAt {
    /// Claimable once this time has passed
    After(DateTime<Utc>),

    /// Held back until stale claims are recovered at the next startup
    NextRun,
}
