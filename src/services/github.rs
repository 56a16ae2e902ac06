// src/services/github.rs

//! GitHub REST and GraphQL client.
//!
//! Handles authentication, pacing, rate-limit pauses and retry with
//! exponential backoff. Two discovery strategies are offered through
//! [`RepoSource::fetch_page`]:
//!
//! - `user_centric`: `GET /search/users?q=location:..` paged by page number,
//!   then `GET /users/{login}/repos` for every account on the page.
//! - `cursor_bulk`: GraphQL repository search paged by `endCursor`.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::{DeserializeOwned, IgnoredAny};
use url::Url;

use super::normalize::{GqlResponse, RestErrorBody, RestRepo, RestUserSearch, SearchData};
use super::rate_limit::RateLimit;
use super::source::{Page, RepoSource};
use crate::error::{FetchError, FetchResult, Result};
use crate::models::{ApiConfig, QuerySpec, Record, RepoKey, Strategy};
use crate::utils::{base_url, http, shutdown::Shutdown};

/// The search endpoints never return more than this many results.
pub const SEARCH_RESULT_CEILING: u32 = 1000;

/// Consecutive waits for a quota reset before giving up on a request.
const MAX_RESET_WAITS: u32 = 3;

const SEARCH_QUERY: &str = r#"
query SearchRepositories($searchQuery: String!, $cursor: String, $first: Int!) {
  rateLimit { limit remaining resetAt }
  search(query: $searchQuery, type: REPOSITORY, first: $first, after: $cursor) {
    repositoryCount
    pageInfo { endCursor hasNextPage }
    edges {
      node {
        ... on Repository {
          name
          description
          url
          stargazerCount
          forkCount
          watchers { totalCount }
          issues(states: OPEN) { totalCount }
          createdAt
          updatedAt
          pushedAt
          primaryLanguage { name }
          licenseInfo { spdxId }
          isFork
          isArchived
          owner {
            login
            ... on User { location }
            ... on Organization { location }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Rest,
    Graphql,
}

/// What to do with a response.
#[derive(Debug, PartialEq)]
enum Verdict {
    Success(Vec<u8>),
    /// Transient; retry after backoff or the server-given delay.
    Retry {
        after: Option<Duration>,
        reason: String,
    },
    /// Primary quota exhausted; wait for the window to reset.
    WaitReset,
    Fail(FetchError),
}

/// Rate-limit aware GitHub API client.
pub struct GitHubClient {
    http: reqwest::Client,
    config: ApiConfig,
    rest_base: Url,
    graphql_url: Url,
    token: Option<String>,
    rate: RwLock<RateLimit>,
    shutdown: Shutdown,
}

impl GitHubClient {
    /// Create a client with an explicit token.
    pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: http::create_async_client(config)?,
            config: config.clone(),
            rest_base: base_url(&config.rest_url)?,
            graphql_url: Url::parse(config.graphql_url.trim())?,
            token: token.filter(|t| !t.trim().is_empty()),
            rate: RwLock::new(RateLimit::default()),
            shutdown: Shutdown::never(),
        })
    }

    /// Create a client reading the token from `config.token_env`.
    pub fn from_env(config: &ApiConfig) -> Result<Self> {
        let client = Self::new(config, std::env::var(&config.token_env).ok())?;
        if !client.is_authenticated() {
            log::warn!(
                "{} is not set or empty; using unauthenticated requests with a much lower rate limit",
                config.token_env
            );
        }
        Ok(client)
    }

    /// Interrupt pauses and backoff waits when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn observe(&self, observed: RateLimit) {
        self.rate
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .update(observed);
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// REST URL from path segments, escaping each one.
    fn rest_url(&self, segments: &[&str]) -> FetchResult<Url> {
        let mut url = self.rest_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::decode("REST base URL cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sleep unless shutdown fires first. Returns false when interrupted.
    async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(20);
        let ms = self
            .config
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.config.backoff_max_ms);
        Duration::from_millis(ms)
    }

    /// Pause until reset when remaining quota is below the safety margin.
    async fn wait_for_capacity(&self) -> FetchResult<()> {
        let rate = self.rate_limit();
        if let Some(pause) = rate.pause_needed(self.config.rate_limit_margin, Utc::now()) {
            log::info!(
                "Rate limit low ({} remaining); pausing {}s until reset",
                rate.remaining.unwrap_or(0),
                pause.as_secs()
            );
            if !self.sleep_or_cancel(pause).await {
                return Err(FetchError::RateLimited {
                    reset_at: rate.reset_at,
                });
            }
        }
        Ok(())
    }

    async fn pace(&self) -> FetchResult<()> {
        if self.config.request_delay_ms > 0 {
            if !self
                .sleep_or_cancel(Duration::from_millis(self.config.request_delay_ms))
                .await
            {
                return Err(FetchError::Cancelled);
            }
        } else if self.shutdown.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(())
    }

    /// Send a request with pacing, rate-limit pauses and retries.
    async fn execute<F>(&self, what: &str, endpoint: Endpoint, build: F) -> FetchResult<Vec<u8>>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        let mut reset_waits = 0;

        loop {
            self.wait_for_capacity().await?;
            self.pace().await?;

            let verdict = match self.authorize(build()).send().await {
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    if let Some(observed) = RateLimit::from_headers(&headers) {
                        self.observe(observed);
                    }
                    match response.bytes().await {
                        Ok(body) => classify(
                            status,
                            &headers,
                            &body,
                            endpoint,
                            &self.rate_limit(),
                            what,
                        ),
                        Err(e) => Verdict::Retry {
                            after: None,
                            reason: e.to_string(),
                        },
                    }
                }
                Err(e) => Verdict::Retry {
                    after: None,
                    reason: e.to_string(),
                },
            };

            let (after, reason) = match verdict {
                Verdict::Success(body) => return Ok(body),
                Verdict::Fail(err) => return Err(err),
                Verdict::WaitReset => {
                    let rate = self.rate_limit();
                    match rate.until_reset(Utc::now()) {
                        Some(wait) => {
                            if reset_waits >= MAX_RESET_WAITS {
                                return Err(FetchError::RateLimited {
                                    reset_at: rate.reset_at,
                                });
                            }
                            reset_waits += 1;
                            log::warn!(
                                "Rate limit exhausted during {}; waiting {}s for reset",
                                what,
                                wait.as_secs()
                            );
                            if !self.sleep_or_cancel(wait).await {
                                return Err(FetchError::RateLimited {
                                    reset_at: rate.reset_at,
                                });
                            }
                            continue;
                        }
                        None => (None, "rate limit exhausted".to_string()),
                    }
                }
                Verdict::Retry { after, reason } => (after, reason),
            };

            attempt += 1;
            if attempt >= attempts {
                return Err(FetchError::transient(reason, attempt));
            }
            let delay = after.unwrap_or_else(|| self.backoff_delay(attempt - 1));
            log::warn!(
                "{} failed (attempt {}/{}): {}; retrying in {}ms",
                what,
                attempt,
                attempts,
                reason,
                delay.as_millis()
            );
            if !self.sleep_or_cancel(delay).await {
                return Err(FetchError::Cancelled);
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, what: &str, url: Url) -> FetchResult<T> {
        let body = self
            .execute(what, Endpoint::Rest, || self.http.get(url.clone()))
            .await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::decode(format!("{}: {}", what, e)))
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        what: &str,
        variables: serde_json::Value,
    ) -> FetchResult<T> {
        let payload = serde_json::json!({ "query": SEARCH_QUERY, "variables": variables });
        let body = self
            .execute(what, Endpoint::Graphql, || {
                self.http.post(self.graphql_url.clone()).json(&payload)
            })
            .await?;

        let response: GqlResponse<T> = serde_json::from_slice(&body)
            .map_err(|e| FetchError::decode(format!("{}: {}", what, e)))?;

        match response.data {
            Some(data) => {
                for err in &response.errors {
                    log::warn!("{}: partial GraphQL error: {}", what, err.message);
                }
                Ok(data)
            }
            None => {
                let first = response.errors.into_iter().next();
                Err(match first {
                    Some(err) if err.kind.as_deref() == Some("NOT_FOUND") => {
                        FetchError::NotFound(err.message)
                    }
                    Some(err) => FetchError::Api {
                        status: 200,
                        message: err.message,
                    },
                    None => FetchError::decode(format!("{}: response without data", what)),
                })
            }
        }
    }

    /// One page of the account search.
    async fn search_users(&self, query: &QuerySpec, page: u32) -> FetchResult<RestUserSearch> {
        let mut url = self.rest_url(&["search", "users"])?;
        url.query_pairs_mut()
            .append_pair("q", &query.user_query())
            .append_pair("sort", &query.account_sort)
            .append_pair("order", "desc")
            .append_pair("per_page", &query.page_size.to_string())
            .append_pair("page", &page.to_string());
        self.get_json(&format!("user search page {}", page), url).await
    }

    /// Most recently updated repositories owned by `login`.
    async fn user_repos(&self, login: &str, query: &QuerySpec) -> FetchResult<Vec<Record>> {
        let mut url = self.rest_url(&["users", login, "repos"])?;
        url.query_pairs_mut()
            .append_pair("type", "owner")
            .append_pair("sort", "updated")
            .append_pair("per_page", &query.repos_per_account.to_string());

        let repos: Vec<RestRepo> = self.get_json(&format!("repos of {}", login), url).await?;
        let fetched_at = Utc::now();
        let mut records = Vec::with_capacity(repos.len());
        for repo in repos {
            records.push(repo.into_record(fetched_at)?);
        }
        Ok(records)
    }

    async fn fetch_user_centric_page(
        &self,
        query: &QuerySpec,
        cursor: Option<&str>,
    ) -> FetchResult<Page> {
        let page: u32 = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| FetchError::decode(format!("invalid page cursor '{}'", c)))?,
            None => 1,
        };
        let page_size = query.page_size.max(1);
        let cap = query.max_accounts.min(SEARCH_RESULT_CEILING);
        let accounts_before = page.saturating_sub(1).saturating_mul(page_size);
        if accounts_before >= cap {
            return Ok(Page::default());
        }

        let search = self.search_users(query, page).await?;
        let full_page = search.items.len() >= page_size as usize;
        let room = (cap - accounts_before) as usize;
        let logins: Vec<String> = search
            .items
            .into_iter()
            .take(room)
            .map(|u| u.login)
            .collect();
        let accounts_after = accounts_before + logins.len() as u32;

        log::debug!(
            "User search page {}: {} accounts ({} total matches)",
            page,
            logins.len(),
            search.total_count
        );

        let results: Vec<(String, FetchResult<Vec<Record>>)> = stream::iter(logins)
            .map(|login| async move {
                let result = self.user_repos(&login, query).await;
                (login, result)
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let mut records = Vec::new();
        let mut first_error = None;
        for (login, result) in results {
            match result {
                Ok(repos) => records.extend(repos),
                Err(FetchError::NotFound(_)) => {
                    log::warn!("Account {} disappeared; skipping", login);
                }
                Err(e) => {
                    log::warn!("Failed to list repositories of {}: {}", login, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        records.retain(|r| r.stars >= query.min_stars && (query.include_forks || !r.is_fork));
        records.sort_by_key(|r| r.key());
        records.dedup_by_key(|r| r.key());

        let more = full_page
            && accounts_after < cap
            && u64::from(accounts_after) < search.total_count;
        Ok(Page {
            records,
            next_cursor: more.then(|| (page + 1).to_string()),
        })
    }

    async fn fetch_cursor_page(&self, query: &QuerySpec, cursor: Option<&str>) -> FetchResult<Page> {
        let variables = serde_json::json!({
            "searchQuery": query.search_query(),
            "cursor": cursor,
            "first": query.page_size.clamp(1, 100),
        });
        let data: SearchData = self.graphql("repository search", variables).await?;
        if let Some(rl) = data.rate_limit {
            self.observe(rl.into());
        }

        let fetched_at = Utc::now();
        let mut records = Vec::new();
        for node in data.search.edges.into_iter().filter_map(|e| e.node) {
            let record = node.into_record(fetched_at)?;
            if record.stars >= query.min_stars && (query.include_forks || !record.is_fork) {
                records.push(record);
            }
        }

        let page_info = data.search.page_info;
        let next_cursor = if page_info.has_next_page {
            page_info.end_cursor
        } else {
            None
        };
        Ok(Page {
            records,
            next_cursor,
        })
    }
}

#[async_trait]
impl RepoSource for GitHubClient {
    async fn fetch_page(&self, query: &QuerySpec, cursor: Option<&str>) -> FetchResult<Page> {
        match query.strategy {
            Strategy::UserCentric => self.fetch_user_centric_page(query, cursor).await,
            Strategy::CursorBulk => self.fetch_cursor_page(query, cursor).await,
        }
    }

    async fn fetch_repo(&self, key: &RepoKey) -> FetchResult<Record> {
        let url = self.rest_url(&["repos", key.owner(), key.name()])?;
        let repo: RestRepo = self.get_json(&format!("repo {}", key), url).await?;
        repo.into_record(Utc::now())
    }

    fn rate_limit(&self) -> RateLimit {
        *self.rate.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("rest_base", &self.rest_base.as_str())
            .field("graphql_url", &self.graphql_url.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

/// Map a response to the action the retry loop takes.
fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    endpoint: Endpoint,
    rate: &RateLimit,
    what: &str,
) -> Verdict {
    if status.is_success() {
        if endpoint == Endpoint::Graphql && graphql_rate_limited(body) {
            return Verdict::WaitReset;
        }
        return Verdict::Success(body.to_vec());
    }

    let message = serde_json::from_slice::<RestErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED => Verdict::Fail(FetchError::Unauthorized(if message.is_empty() {
            "bad credentials".to_string()
        } else {
            message
        })),
        StatusCode::NOT_FOUND => Verdict::Fail(FetchError::NotFound(what.to_string())),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            let lowered = message.to_lowercase();
            if let Some(after) = http::retry_after(headers) {
                Verdict::Retry {
                    after: Some(after),
                    reason: format!("secondary rate limit ({})", status.as_u16()),
                }
            } else if lowered.contains("secondary rate limit") || lowered.contains("abuse") {
                Verdict::Retry {
                    after: None,
                    reason: format!("secondary rate limit ({})", status.as_u16()),
                }
            } else if rate.is_exhausted() {
                Verdict::WaitReset
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                Verdict::Retry {
                    after: None,
                    reason: "too many requests".to_string(),
                }
            } else {
                Verdict::Fail(FetchError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
        s if s.is_server_error() => Verdict::Retry {
            after: None,
            reason: format!("server error {}", s.as_u16()),
        },
        s => Verdict::Fail(FetchError::Api {
            status: s.as_u16(),
            message,
        }),
    }
}

fn graphql_rate_limited(body: &[u8]) -> bool {
    serde_json::from_slice::<GqlResponse<IgnoredAny>>(body)
        .map(|r| {
            r.errors
                .iter()
                .any(|e| e.kind.as_deref() == Some("RATE_LIMITED"))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::normalize::samples::{gql_repo, rest_repo};
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> ApiConfig {
        ApiConfig {
            rest_url: server.uri(),
            graphql_url: format!("{}/graphql", server.uri()),
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            request_delay_ms: 0,
            ..Default::default()
        }
    }

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(&test_config(server), Some("test-token".into())).unwrap()
    }

    #[test]
    fn classify_maps_statuses() {
        let rate = RateLimit::default();
        let h = HeaderMap::new();
        let c = |code: u16, body: &[u8]| {
            classify(
                StatusCode::from_u16(code).unwrap(),
                &h,
                body,
                Endpoint::Rest,
                &rate,
                "x",
            )
        };

        assert!(matches!(c(200, b"{}"), Verdict::Success(_)));
        assert!(matches!(c(401, b"{}"), Verdict::Fail(FetchError::Unauthorized(_))));
        assert!(matches!(c(404, b"{}"), Verdict::Fail(FetchError::NotFound(_))));
        assert!(matches!(c(502, b""), Verdict::Retry { after: None, .. }));
        assert!(matches!(c(429, b"{}"), Verdict::Retry { .. }));
        assert!(matches!(
            c(403, br#"{"message":"You have exceeded a secondary rate limit"}"#),
            Verdict::Retry { .. }
        ));
        assert!(matches!(
            c(403, br#"{"message":"Resource not accessible"}"#),
            Verdict::Fail(FetchError::Api { status: 403, .. })
        ));
        assert!(matches!(
            c(422, b"{}"),
            Verdict::Fail(FetchError::Api { status: 422, .. })
        ));
    }

    #[test]
    fn classify_primary_exhaustion_waits_for_reset() {
        let rate = RateLimit {
            remaining: Some(0),
            ..Default::default()
        };
        let verdict = classify(
            StatusCode::FORBIDDEN,
            &HeaderMap::new(),
            br#"{"message":"API rate limit exceeded"}"#,
            Endpoint::Rest,
            &rate,
            "x",
        );
        assert_eq!(verdict, Verdict::WaitReset);
    }

    #[test]
    fn classify_honors_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        let verdict = classify(
            StatusCode::FORBIDDEN,
            &headers,
            b"{}",
            Endpoint::Rest,
            &RateLimit::default(),
            "x",
        );
        assert!(matches!(
            verdict,
            Verdict::Retry { after: Some(d), .. } if d == Duration::from_secs(3)
        ));
    }

    #[test]
    fn classify_graphql_rate_limited_body() {
        let body = br#"{"data":null,"errors":[{"type":"RATE_LIMITED","message":"API rate limit exceeded"}]}"#;
        let verdict = classify(
            StatusCode::OK,
            &HeaderMap::new(),
            body,
            Endpoint::Graphql,
            &RateLimit::default(),
            "x",
        );
        assert_eq!(verdict, Verdict::WaitReset);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ApiConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 500,
            ..Default::default()
        };
        let client = GitHubClient::new(&config, None).unwrap();
        assert_eq!(client.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(client.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(client.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(client.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(client.backoff_delay(60), Duration::from_millis(500));
        assert!(!client.is_authenticated());
    }

    #[test]
    fn blank_token_is_unauthenticated() {
        let config = ApiConfig::default();
        for blank in ["", "   ", "\n"] {
            let client = GitHubClient::new(&config, Some(blank.to_string())).unwrap();
            assert!(!client.is_authenticated());
        }
        assert!(GitHubClient::new(&config, Some("ghp_x".into())).unwrap().is_authenticated());

        let unset = ApiConfig {
            token_env: "SOURCE_RANKER_TEST_TOKEN_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(!GitHubClient::from_env(&unset).unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn fetch_repo_normalizes_and_tracks_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/cat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-limit", "5000")
                    .insert_header("x-ratelimit-remaining", "4321")
                    .insert_header("x-ratelimit-reset", "1767225600")
                    .set_body_json(rest_repo("Octo", "Cat", 42)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let record = client.fetch_repo(&RepoKey::new("octo", "cat")).await.unwrap();
        assert_eq!(record.stars, 42);
        assert_eq!(record.key().as_str(), "octo/cat");
        assert_eq!(client.rate_limit().remaining, Some(4321));
    }

    #[tokio::test]
    async fn fetch_repo_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/gone/away"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_repo(&RepoKey::new("gone", "away"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rest_repo("a", "b", 1)))
            .mount(&server)
            .await;

        let record = client(&server).fetch_repo(&RepoKey::new("a", "b")).await.unwrap();
        assert_eq!(record.name, "b");
    }

    #[tokio::test]
    async fn exhausted_retries_surface_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_repo(&RepoKey::new("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transient { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_repo(&RepoKey::new("a", "b"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Unauthorized("Bad credentials".into()));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn secondary_rate_limit_retries_after_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(ResponseTemplate::new(403).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rest_repo("a", "b", 1)))
            .mount(&server)
            .await;

        assert!(client(&server).fetch_repo(&RepoKey::new("a", "b")).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_rate_limit_pause_surfaces_rate_limited() {
        let server = MockServer::start().await;
        let reset = (Utc::now() + chrono::Duration::hours(1)).timestamp().to_string();
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining", "3")
                    .insert_header("x-ratelimit-reset", reset.as_str())
                    .set_body_json(rest_repo("a", "b", 1)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (tx, shutdown) = Shutdown::channel();
        let client = client(&server).with_shutdown(shutdown);
        let key = RepoKey::new("a", "b");
        assert!(client.fetch_repo(&key).await.is_ok());

        tx.send(true).unwrap();
        let err = client.fetch_repo(&key).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { reset_at: Some(_) }));
    }

    #[tokio::test]
    async fn cursor_page_from_graphql() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "rateLimit": { "limit": 5000, "remaining": 4990, "resetAt": "2026-01-01T00:00:00Z" },
                    "search": {
                        "repositoryCount": 2,
                        "pageInfo": { "endCursor": "abc", "hasNextPage": true },
                        "edges": [
                            { "node": gql_repo("alice", "one", 50, Some("Seattle")) },
                            { "node": gql_repo("bob", "two", 1, None) }
                        ]
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = QuerySpec {
            strategy: Strategy::CursorBulk,
            min_stars: 10,
            ..Default::default()
        };
        let client = client(&server);
        let page = client.fetch_page(&query, None).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].owner_location.as_deref(), Some("Seattle"));
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        assert_eq!(client.rate_limit().remaining, Some(4990));
    }

    #[tokio::test]
    async fn graphql_error_without_data_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [ { "message": "Something went wrong" } ]
            })))
            .mount(&server)
            .await;

        let query = QuerySpec {
            strategy: Strategy::CursorBulk,
            ..Default::default()
        };
        let err = client(&server).fetch_page(&query, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Api { status: 200, .. }));
    }

    #[tokio::test]
    async fn user_centric_page_collects_account_repos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/users"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 3,
                "items": [ { "login": "bob" }, { "login": "alice" }, { "login": "ghost" } ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/alice/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                rest_repo("alice", "big", 500),
                rest_repo("alice", "tiny", 1)
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/bob/repos"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([rest_repo("bob", "tool", 20)])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/ghost/repos"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let query = QuerySpec {
            min_stars: 5,
            page_size: 10,
            ..Default::default()
        };
        let page = client(&server).fetch_page(&query, None).await.unwrap();
        let keys: Vec<String> = page.records.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["alice/big", "bob/tool"]);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn user_centric_page_fails_when_an_account_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 2,
                "items": [ { "login": "ok" }, { "login": "broken" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/ok/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([rest_repo("ok", "r", 9)])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/broken/repos"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_page(&QuerySpec::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }));
    }

    #[tokio::test]
    async fn user_centric_next_cursor_when_page_full() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/users"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 10,
                "items": [ { "login": "c" }, { "login": "d" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/c/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/d/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let query = QuerySpec {
            page_size: 2,
            ..Default::default()
        };
        let page = client(&server).fetch_page(&query, Some("2")).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_cursor.as_deref(), Some("3"));
    }
}
