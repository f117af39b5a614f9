//! Remote API collaborator
//!
//! The crawl driver only ever talks to the social network through [`SocialApi`], so
//! tests can swap in an in-memory implementation.

use crate::state::{Account, AccountId, Post};
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a [`SocialApi`] implementation
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Rate limited and not allowed to (or no longer willing to) wait
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The account is deleted, suspended or does not exist
    #[error("Account unavailable: {0}")]
    Unavailable(String),

    /// The account's data is protected
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Credentials were rejected; may succeed later
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network error, timeout or server error
    #[error("Transient API failure: {0}")]
    Transient(String),

    /// A response body could not be decoded at all, e.g. a truncated page
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns true if retrying the same request can never succeed
    ///
    /// A task failing permanently is completed without data. Everything else is
    /// retried, bounded by the scheduler's attempt limit.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Forbidden(_))
    }
}

/// Result type for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Access to accounts, posts and relationship lists
///
/// Implementations absorb rate limiting internally; by the time an error reaches the
/// caller, waiting has already been tried.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Fetches a single profile
    async fn fetch_profile(&self, id: AccountId) -> ApiResult<Account>;

    /// Fetches several profiles at once
    ///
    /// Ids the service does not know are simply absent from the result.
    async fn fetch_profiles(&self, ids: &[AccountId]) -> ApiResult<Vec<Account>>;

    /// Fetches the account's complete post history
    async fn fetch_timeline(&self, id: AccountId) -> ApiResult<Vec<Post>>;

    /// Fetches the ids of accounts following `id`
    async fn fetch_followers(&self, id: AccountId) -> ApiResult<Vec<AccountId>>;

    /// Fetches the ids of accounts `id` follows
    async fn fetch_friends(&self, id: AccountId) -> ApiResult<Vec<AccountId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_classification() {
        assert!(ApiError::Unavailable("gone".into()).is_permanent());
        assert!(ApiError::Forbidden("protected".into()).is_permanent());

        assert!(!ApiError::Decode("truncated page".into()).is_permanent());
        assert!(!ApiError::Transient("503".into()).is_permanent());
        assert!(!ApiError::Unauthorized("401".into()).is_permanent());
        assert!(!ApiError::RateLimited {
            retry_after_secs: Some(60)
        }
        .is_permanent());
    }
}
