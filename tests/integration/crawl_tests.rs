//! Integration tests for the crawler
//!
//! Most tests drive the full coordinator against an in-memory `SocialApi`; the last
//! one runs the real HTTP client against a wiremock server.

use async_trait::async_trait;
use social_trawl::config::Config;
use social_trawl::crawler::{ApiError, ApiResult, Coordinator, CrawlOptions, SocialApi};
use social_trawl::state::{Account, AccountId, EdgeKind, Post, TaskStatus, TaskType};
use social_trawl::storage::{
    lock, ContentStore, RelationshipStore, SqliteStorage, TaskStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// In-memory social network with failure injection
#[derive(Default)]
struct MockApi {
    profiles: HashMap<AccountId, Account>,
    timelines: HashMap<AccountId, Vec<Post>>,
    followers: HashMap<AccountId, Vec<AccountId>>,
    friends: HashMap<AccountId, Vec<AccountId>>,
    unavailable: HashSet<AccountId>,
    transient_failures: Mutex<HashMap<(AccountId, &'static str), u32>>,
    calls: Mutex<HashMap<&'static str, Vec<AccountId>>>,
}

impl MockApi {
    fn call(&self, id: AccountId, endpoint: &'static str) -> ApiResult<()> {
        self.calls
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push(id);

        if self.unavailable.contains(&id) {
            return Err(ApiError::Unavailable(format!("account {} suspended", id)));
        }

        let mut failures = self.transient_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&(id, endpoint)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Transient("503 Service Unavailable".to_string()));
            }
        }

        Ok(())
    }

    fn fail_times(&self, id: AccountId, endpoint: &'static str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert((id, endpoint), times);
    }

    fn recover(&self) {
        self.transient_failures.lock().unwrap().clear();
    }

    fn calls(&self, endpoint: &str) -> Vec<AccountId> {
        self.calls
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SocialApi for MockApi {
    async fn fetch_profile(&self, id: AccountId) -> ApiResult<Account> {
        self.call(id, "profile")?;
        self.profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::Unavailable(format!("account {} not found", id)))
    }

    async fn fetch_profiles(&self, ids: &[AccountId]) -> ApiResult<Vec<Account>> {
        let mut found = Vec::new();
        for &id in ids {
            if self.call(id, "profile").is_ok() {
                if let Some(account) = self.profiles.get(&id) {
                    found.push(account.clone());
                }
            }
        }
        Ok(found)
    }

    async fn fetch_timeline(&self, id: AccountId) -> ApiResult<Vec<Post>> {
        self.call(id, "timeline")?;
        Ok(self.timelines.get(&id).cloned().unwrap_or_default())
    }

    async fn fetch_followers(&self, id: AccountId) -> ApiResult<Vec<AccountId>> {
        self.call(id, "followers")?;
        Ok(self.followers.get(&id).cloned().unwrap_or_default())
    }

    async fn fetch_friends(&self, id: AccountId) -> ApiResult<Vec<AccountId>> {
        self.call(id, "friends")?;
        Ok(self.friends.get(&id).cloned().unwrap_or_default())
    }
}

fn profile(id: AccountId, screen_name: &str) -> Account {
    Account {
        screen_name: Some(screen_name.to_string()),
        followers_count: Some(1),
        ..Account::with_id(id)
    }
}

fn post(id: &str, account_id: AccountId) -> Post {
    Post {
        id: id.to_string(),
        account_id,
        text: format!("post {}", id),
        created_at: Some("2017-07-05T12:00:00Z".to_string()),
        in_reply_to_id: None,
    }
}

/// Creates a test configuration
fn create_test_config(workers: usize, profile_batch_size: usize, seeds: &[AccountId]) -> Config {
    let mut config: Config = toml::from_str(&format!(
        r#"
[crawler]
workers = {}
profile-batch-size = {}
progress-interval = 5
max-task-attempts = 3
retry-backoff-ms = 10

[api]
base-url = "http://127.0.0.1:9"
retry-delay-ms = 10

[output]
database-path = ":memory:"
"#,
        workers, profile_batch_size
    ))
    .expect("Failed to parse test config");
    config.seeds.ids = seeds.to_vec();
    config
}

fn coordinator(config: Config, api: Arc<MockApi>) -> Coordinator {
    let storage = SqliteStorage::new_in_memory().expect("Failed to create storage");
    Coordinator::from_parts(config, storage, api, "test-hash".to_string())
}

fn task_status(coordinator: &Coordinator, id: AccountId, task_type: TaskType) -> Option<TaskStatus> {
    lock(coordinator.scheduler().storage())
        .unwrap()
        .get_task(id, task_type)
        .unwrap()
        .map(|t| t.status)
}

/// Seed S1 with profile P1, timeline [T1, T2], one follower A and no friends
fn single_seed_network() -> MockApi {
    const S1: AccountId = 1;
    const A: AccountId = 2;

    let mut api = MockApi::default();
    api.profiles.insert(S1, profile(S1, "p1"));
    api.profiles.insert(A, profile(A, "a"));
    api.timelines.insert(S1, vec![post("T1", S1), post("T2", S1)]);
    api.followers.insert(S1, vec![A]);
    api.friends.insert(S1, vec![]);
    api
}

async fn assert_single_seed_crawl(profile_batch_size: usize) {
    let api = Arc::new(single_seed_network());
    let coordinator = coordinator(create_test_config(1, profile_batch_size, &[1]), api.clone());

    let report = coordinator.run(CrawlOptions::default()).await.unwrap();

    for task_type in TaskType::SEED_TASKS {
        assert_eq!(task_status(&coordinator, 1, task_type), Some(TaskStatus::Complete));
    }

    // The follower is discovered with PROFILE and TIMELINE only
    assert_eq!(task_status(&coordinator, 2, TaskType::Profile), Some(TaskStatus::Complete));
    assert_eq!(task_status(&coordinator, 2, TaskType::Timeline), Some(TaskStatus::Complete));
    assert_eq!(task_status(&coordinator, 2, TaskType::Followers), None);
    assert_eq!(task_status(&coordinator, 2, TaskType::Friends), None);

    let storage = lock(coordinator.scheduler().storage()).unwrap();
    let posts: Vec<_> = storage
        .get_posts(1)
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(posts, vec!["T1", "T2"]);
    let seed = storage.get_account(1).unwrap().unwrap();
    assert_eq!(seed.screen_name.as_deref(), Some("p1"));
    assert!(seed.is_seed);
    assert!(!storage.get_account(2).unwrap().unwrap().is_seed);
    assert_eq!(storage.edges_from(1, EdgeKind::FollowedBy).unwrap(), vec![2]);
    assert!(storage.edges_from(1, EdgeKind::Follows).unwrap().is_empty());
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Pending).unwrap(), 0);

    assert_eq!(report.posts_saved, 2);
    assert_eq!(report.edges_saved, 1);
    assert_eq!(report.retried, 0);
}

#[tokio::test]
async fn test_single_seed_crawl() {
    assert_single_seed_crawl(1).await;
}

#[tokio::test]
async fn test_single_seed_crawl_with_profile_batching() {
    assert_single_seed_crawl(100).await;
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let api = Arc::new(single_seed_network());
    api.fail_times(1, "timeline", 2);

    let coordinator = coordinator(create_test_config(1, 1, &[1]), api.clone());
    let report = coordinator.run(CrawlOptions::default()).await.unwrap();

    assert_eq!(report.retried, 2);
    assert_eq!(api.calls("timeline").iter().filter(|id| **id == 1).count(), 3);
    assert_eq!(task_status(&coordinator, 1, TaskType::Timeline), Some(TaskStatus::Complete));

    let storage = lock(coordinator.scheduler().storage()).unwrap();
    assert_eq!(storage.get_posts(1).unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_failure_is_left_for_next_run() {
    let api = Arc::new(single_seed_network());
    api.fail_times(1, "timeline", u32::MAX);

    let coordinator = coordinator(create_test_config(1, 1, &[1]), api.clone());
    let report = tokio::time::timeout(
        Duration::from_secs(30),
        coordinator.run(CrawlOptions::default()),
    )
    .await
    .expect("crawl should drain despite a failing task")
    .unwrap();

    // Three attempts, then the task waits for the next run
    assert_eq!(report.retried, 3);
    assert_eq!(api.calls("timeline").iter().filter(|id| **id == 1).count(), 3);
    assert_eq!(task_status(&coordinator, 1, TaskType::Timeline), Some(TaskStatus::Incomplete));
    assert_eq!(task_status(&coordinator, 1, TaskType::Followers), Some(TaskStatus::Complete));
    assert_eq!(task_status(&coordinator, 2, TaskType::Timeline), Some(TaskStatus::Complete));

    // Once the service recovers, the next run picks it up
    api.recover();
    let report = coordinator.run(CrawlOptions::default()).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(task_status(&coordinator, 1, TaskType::Timeline), Some(TaskStatus::Complete));
}

#[tokio::test]
async fn test_unavailable_account_completes_without_data() {
    let mut network = MockApi::default();
    network.unavailable.insert(7);
    let api = Arc::new(network);

    let coordinator = coordinator(create_test_config(2, 1, &[7]), api.clone());
    let report = coordinator.run(CrawlOptions::default()).await.unwrap();

    assert_eq!(report.unavailable, 4);
    for task_type in TaskType::SEED_TASKS {
        assert_eq!(task_status(&coordinator, 7, task_type), Some(TaskStatus::Complete));
    }

    let storage = lock(coordinator.scheduler().storage()).unwrap();
    assert!(!storage.has_profile(7).unwrap());
    assert!(!storage.has_posts(7).unwrap());
    assert_eq!(storage.count_edges().unwrap(), 0);
}

#[tokio::test]
async fn test_profiles_missing_from_batch_are_unavailable() {
    let mut network = MockApi::default();
    network.profiles.insert(1, profile(1, "present"));
    let api = Arc::new(network);

    let coordinator = coordinator(create_test_config(1, 50, &[1, 2]), api.clone());
    coordinator.run(CrawlOptions::default()).await.unwrap();

    assert_eq!(task_status(&coordinator, 2, TaskType::Profile), Some(TaskStatus::Complete));
    let storage = lock(coordinator.scheduler().storage()).unwrap();
    assert!(storage.has_profile(1).unwrap());
    assert!(!storage.has_profile(2).unwrap());
}

#[tokio::test]
async fn test_resume_after_interrupted_claims() {
    let api = Arc::new(single_seed_network());
    let coordinator = coordinator(create_test_config(1, 1, &[]), api.clone());

    // A previous process claimed two tasks and died
    coordinator.scheduler().seed(&[1]).unwrap();
    coordinator.scheduler().next_work().unwrap().unwrap();
    coordinator.scheduler().next_work().unwrap().unwrap();
    {
        let storage = lock(coordinator.scheduler().storage()).unwrap();
        assert_eq!(storage.count_tasks_by_status(TaskStatus::Pending).unwrap(), 2);
    }

    coordinator.run(CrawlOptions::default()).await.unwrap();

    let storage = lock(coordinator.scheduler().storage()).unwrap();
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Pending).unwrap(), 0);
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Incomplete).unwrap(), 0);
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Complete).unwrap(), 6);
}

#[tokio::test]
async fn test_rerun_does_no_new_work() {
    let api = Arc::new(single_seed_network());
    let coordinator = coordinator(create_test_config(2, 1, &[1]), api.clone());

    coordinator.run(CrawlOptions::default()).await.unwrap();
    let timeline_calls = api.calls("timeline").len();

    let report = coordinator.run(CrawlOptions::default()).await.unwrap();
    assert_eq!(report.tasks_processed(), 0);
    assert_eq!(api.calls("timeline").len(), timeline_calls);
}

#[tokio::test]
async fn test_reconcile_skips_stored_work() {
    let api = Arc::new(single_seed_network());
    let coordinator = coordinator(create_test_config(1, 1, &[]), api.clone());

    coordinator.scheduler().seed(&[1]).unwrap();
    {
        let mut storage = lock(coordinator.scheduler().storage()).unwrap();
        storage.save_posts(&[post("T1", 1)]).unwrap();
    }

    coordinator
        .run(CrawlOptions { reconcile: true })
        .await
        .unwrap();

    assert!(api.calls("timeline").iter().all(|id| *id != 1));
    assert_eq!(task_status(&coordinator, 1, TaskType::Timeline), Some(TaskStatus::Complete));
}

#[tokio::test]
async fn test_workers_never_duplicate_work() {
    let seeds: Vec<AccountId> = (1..=8).collect();
    let mut network = MockApi::default();
    for &id in &seeds {
        network.profiles.insert(id, profile(id, "seed"));
        network.timelines.insert(id, vec![post(&format!("s{}", id), id)]);
        network.followers.insert(id, vec![100 + id, 500]);
        network.friends.insert(id, vec![200 + id]);
    }
    let api = Arc::new(network);

    let coordinator = coordinator(create_test_config(4, 1, &seeds), api.clone());
    let report = coordinator.run(CrawlOptions::default()).await.unwrap();

    // 8 seeds, 8 distinct followers, 8 distinct friends and one shared follower
    let expected: HashSet<AccountId> = seeds
        .iter()
        .flat_map(|id| [*id, 100 + id, 200 + id])
        .chain([500])
        .collect();

    for endpoint in ["profile", "timeline"] {
        let calls = api.calls(endpoint);
        let distinct: HashSet<_> = calls.iter().copied().collect();
        assert_eq!(calls.len(), distinct.len(), "{} fetched twice", endpoint);
        assert_eq!(distinct, expected);
    }
    assert_eq!(api.calls("followers").len(), 8);
    assert_eq!(api.calls("friends").len(), 8);

    let storage = lock(coordinator.scheduler().storage()).unwrap();
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Complete).unwrap(), 32 + 17 * 2);
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Incomplete).unwrap(), 0);
    assert_eq!(storage.count_edges().unwrap(), 24);
    assert_eq!(report.tasks_processed(), 32 + 17 * 2);
}

#[tokio::test]
async fn test_full_crawl_over_http() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    Mock::given(method("GET"))
        .and(path("/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[{"id": 1, "screen_name": "seed"}, {"id": 2, "screen_name": "follower"}]"#,
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/1/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"items": [{"id": "T1", "text": "hello\tworld"}], "next_cursor": null}"#,
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/2/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/1/followers"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": [2]}"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/1/friends"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
        .mount(&mock_server)
        .await;

    let config: Config = toml::from_str(&format!(
        r#"
[crawler]
workers = 2
retry-backoff-ms = 10

[api]
base-url = "{}"
retry-delay-ms = 10

[output]
database-path = "{}"
export-dir = "{}"

[seeds]
ids = [1]
"#,
        mock_server.uri(),
        db_path.display(),
        dir.path().join("export").display()
    ))
    .unwrap();
    let export_dir = dir.path().join("export");

    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();
    let report = coordinator.run(CrawlOptions::default()).await.unwrap();
    assert_eq!(report.retried, 0);
    drop(coordinator);

    // Everything is durable in the database file
    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_tasks_by_status(TaskStatus::Complete).unwrap(), 6);
    assert_eq!(storage.count_accounts().unwrap(), 2);
    assert_eq!(storage.count_seed_accounts().unwrap(), 1);
    assert!(storage.get_account(1).unwrap().unwrap().is_seed);
    assert_eq!(storage.count_posts().unwrap(), 1);
    assert_eq!(storage.edges_from(1, EdgeKind::FollowedBy).unwrap(), vec![2]);

    let summary = social_trawl::output::export_timelines(&storage, &export_dir).unwrap();
    assert_eq!(summary.written, 1);
    let exported =
        std::fs::read_to_string(social_trawl::output::export_path(&export_dir, 1)).unwrap();
    assert!(exported.contains("T1\thello\\tworld"));
}
