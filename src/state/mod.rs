//! State module for the crawl's domain records
//!
//! # Components
//!
//! - `TaskType` / `TaskStatus` / `Task`: the units of schedulable work and their progress
//! - `RetryAt`: when a failed task becomes claimable again
//! - `Account` / `Post`: profile and timeline data collected from the API
//! - `EdgeKind`: direction of a follower/friend relationship

mod account;
mod task_state;

// Re-export main types
pub use account::{Account, AccountId, EdgeKind, Post};
pub use task_state::{RetryAt, Task, TaskStatus, TaskType};
