//! HTTP implementation of the API collaborator
//!
//! This module talks to a JSON-over-HTTP service, including:
//! - Building the HTTP client with the crawler's user agent and timeouts
//! - Bearer token authentication
//! - Cursor pagination for timelines and relationship lists
//! - Waiting out 429 responses using `Retry-After`
//! - Retrying network errors and 5xx responses
//! - Classifying everything else into an [`ApiError`]
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | `fetch_profile` | `GET {base}/accounts/{id}` |
//! | `fetch_profiles` | `GET {base}/accounts?ids=1,2,3` |
//! | `fetch_timeline` | `GET {base}/accounts/{id}/posts?cursor=..&count=..` |
//! | `fetch_followers` | `GET {base}/accounts/{id}/followers?cursor=..&count=..` |
//! | `fetch_friends` | `GET {base}/accounts/{id}/friends?cursor=..&count=..` |
//!
//! Paginated endpoints answer `{"items": [...], "next_cursor": "..."}`. The first
//! request sends cursor `-1`; a missing, empty or `"0"` next cursor ends the listing.

use crate::config::ApiConfig;
use crate::crawler::api::{ApiError, ApiResult, SocialApi};
use crate::state::{Account, AccountId, Post};
use crate::{ConfigError, TrawlError};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::time::Duration;
use url::Url;

/// Cursor sent with the first page request
const FIRST_CURSOR: &str = "-1";

/// One page of a cursor-paginated listing
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,

    #[serde(default)]
    next_cursor: Option<String>,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The API configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`SocialApi`] over HTTP
pub struct HttpSocialApi {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    wait_on_rate_limit: bool,
    max_rate_limit_wait: Duration,
    page_size: u32,
}

impl HttpSocialApi {
    /// Creates a client from the `[api]` configuration section
    pub fn new(config: &ApiConfig) -> Result<Self, TrawlError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

        // Without a trailing slash, joining would replace the last path segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: build_http_client(config)?,
            base_url,
            bearer_token: config.bearer_token.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            wait_on_rate_limit: config.wait_on_rate_limit,
            max_rate_limit_wait: Duration::from_secs(config.max_rate_limit_wait_secs),
            page_size: config.page_size,
        })
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transient(format!("Invalid endpoint '{}': {}", path, e)))
    }

    /// Sends a GET and returns the body of a successful response
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 429 | Wait `Retry-After` (or the retry delay), up to `max-retries` times |
    /// | HTTP 5xx / 408 | Retry up to `max-retries` times → `Transient` |
    /// | Timeout / connection error | Retry up to `max-retries` times → `Transient` |
    /// | HTTP 401 | Immediate → `Unauthorized` |
    /// | HTTP 403 | Immediate → `Forbidden` |
    /// | HTTP 404 / 410 / other 4xx | Immediate → `Unavailable` |
    async fn get_body(&self, url: &Url) -> ApiResult<String> {
        let mut retries = 0;
        let mut rate_limit_waits = 0;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .text()
                        .await
                        .map_err(|e| ApiError::Transient(describe_reqwest_error(&e)));
                }
                Ok(response) => classify_response(&response),
                Err(e) => ApiError::Transient(describe_reqwest_error(&e)),
            };

            match error {
                ApiError::RateLimited { retry_after_secs } => {
                    let wait = retry_after_secs
                        .map(Duration::from_secs)
                        .unwrap_or(self.retry_delay);

                    if !self.wait_on_rate_limit
                        || rate_limit_waits >= self.max_retries.max(1)
                        || wait > self.max_rate_limit_wait
                    {
                        return Err(error);
                    }

                    rate_limit_waits += 1;
                    tracing::warn!("Rate limited on {}, waiting {:?}", url.path(), wait);
                    tokio::time::sleep(wait).await;
                }
                ApiError::Transient(ref message) if retries < self.max_retries => {
                    retries += 1;
                    tracing::debug!(
                        "Retrying {} ({}/{}): {}",
                        url.path(),
                        retries,
                        self.max_retries,
                        message
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => return Err(other),
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> ApiResult<T> {
        let body = self.get_body(url).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Walks every page of a cursor-paginated listing
    async fn get_all_pages(&self, path: &str) -> ApiResult<Vec<Box<RawValue>>> {
        let mut items = Vec::new();
        let mut cursor = FIRST_CURSOR.to_string();

        loop {
            let mut url = self.endpoint(path)?;
            url.query_pairs_mut()
                .append_pair("cursor", &cursor)
                .append_pair("count", &self.page_size.to_string());

            let page: Page<Box<RawValue>> = self.get_json(&url).await?;
            items.extend(page.items);

            match page.next_cursor {
                Some(next) if !next.is_empty() && next != "0" && next != cursor => cursor = next,
                _ => break,
            }
        }

        tracing::trace!("Fetched {} records from {}", items.len(), path);
        Ok(items)
    }

    /// Fetches a listing and decodes each record on its own
    ///
    /// A record that fails to decode is logged and dropped; the rest of the listing
    /// is kept.
    async fn get_listing<T: DeserializeOwned>(&self, path: &str) -> ApiResult<Vec<T>> {
        let raw = self.get_all_pages(path).await?;
        Ok(decode_records(raw, path))
    }

    async fn fetch_ids(&self, id: AccountId, relation: &str) -> ApiResult<Vec<AccountId>> {
        self.get_listing(&format!("accounts/{}/{}", id, relation))
            .await
    }
}

#[async_trait]
impl SocialApi for HttpSocialApi {
    async fn fetch_profile(&self, id: AccountId) -> ApiResult<Account> {
        let url = self.endpoint(&format!("accounts/{}", id))?;
        let mut account: Account = self.get_json(&url).await?;
        account.is_seed = false;
        Ok(account)
    }

    async fn fetch_profiles(&self, ids: &[AccountId]) -> ApiResult<Vec<Account>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.endpoint("accounts")?;
        url.query_pairs_mut().append_pair("ids", &joined);

        let raw: Vec<Box<RawValue>> = self.get_json(&url).await?;
        let mut accounts: Vec<Account> = decode_records(raw, "accounts");
        for account in &mut accounts {
            account.is_seed = false;
        }

        Ok(accounts)
    }

    async fn fetch_timeline(&self, id: AccountId) -> ApiResult<Vec<Post>> {
        let mut posts: Vec<Post> = self.get_listing(&format!("accounts/{}/posts", id)).await?;
        for post in &mut posts {
            post.account_id = id;
        }
        Ok(posts)
    }

    async fn fetch_followers(&self, id: AccountId) -> ApiResult<Vec<AccountId>> {
        self.fetch_ids(id, "followers").await
    }

    async fn fetch_friends(&self, id: AccountId) -> ApiResult<Vec<AccountId>> {
        self.fetch_ids(id, "friends").await
    }
}

fn decode_records<T: DeserializeOwned>(raw: Vec<Box<RawValue>>, source: &str) -> Vec<T> {
    raw.into_iter()
        .filter_map(|record| match serde_json::from_str(record.get()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!("Skipping undecodable record from {}: {}", source, e);
                None
            }
        })
        .collect()
}

/// Maps a non-success response to an error
fn classify_response(response: &Response) -> ApiError {
    let status = response.status();

    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            retry_after_secs: response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        },
        StatusCode::REQUEST_TIMEOUT => ApiError::Transient(status.to_string()),
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized(status.to_string()),
        StatusCode::FORBIDDEN => ApiError::Forbidden(status.to_string()),
        StatusCode::NOT_FOUND | StatusCode::GONE => ApiError::Unavailable(status.to_string()),
        s if s.is_client_error() => ApiError::Unavailable(s.to_string()),
        s => ApiError::Transient(s.to_string()),
    }
}

fn describe_reqwest_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        format!("Connection failed: {}", error)
    } else {
        error.to_string()
    }
}
