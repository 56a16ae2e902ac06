// src/services/normalize.rs

//! Wire shapes of the REST and GraphQL APIs and their conversion to [`Record`].
//!
//! Everything downstream of the client sees only `Record`; transport
//! differences end here.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::rate_limit::RateLimit;
use crate::error::{FetchError, FetchResult};
use crate::models::Record;

// --- REST ---

#[derive(Debug, Clone, Deserialize)]
pub struct RestOwner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestLicense {
    #[serde(default)]
    pub spdx_id: Option<String>,
}

/// Repository object from `/repos/{o}/{n}` and `/users/{login}/repos`.
#[derive(Debug, Clone, Deserialize)]
pub struct RestRepo {
    pub name: String,
    pub owner: RestOwner,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub license: Option<RestLicense>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
}

impl RestRepo {
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> FetchResult<Record> {
        build(
            RecordParts {
                owner: self.owner.login,
                name: self.name,
                description: self.description,
                url: self.html_url,
                stars: self.stargazers_count,
                forks: self.forks_count,
                watchers: self.watchers_count,
                open_issues: self.open_issues_count,
                created_at: self.created_at,
                updated_at: self.updated_at,
                pushed_at: self.pushed_at,
                language: self.language,
                license: self.license.and_then(|l| l.spdx_id),
                is_fork: self.fork,
                is_archived: self.archived,
                owner_location: None,
            },
            fetched_at,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestUser {
    pub login: String,
}

/// Response of `/search/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct RestUserSearch {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<RestUser>,
}

/// Error body returned with non-success REST responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestErrorBody {
    #[serde(default)]
    pub message: String,
}

// --- GraphQL ---

#[derive(Debug, Clone, Deserialize)]
pub struct GqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GqlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GqlError {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlRateLimit {
    #[serde(default)]
    pub limit: Option<u64>,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl From<GqlRateLimit> for RateLimit {
    fn from(rl: GqlRateLimit) -> Self {
        Self {
            limit: rl.limit,
            remaining: Some(rl.remaining),
            reset_at: Some(rl.reset_at),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    #[serde(default)]
    pub rate_limit: Option<GqlRateLimit>,
    pub search: SearchConnection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConnection {
    #[serde(default)]
    pub repository_count: u64,
    pub page_info: PageInfo,
    #[serde(default)]
    pub edges: Vec<SearchEdge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchEdge {
    #[serde(default)]
    pub node: Option<GqlRepo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GqlOwner {
    pub login: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalCount {
    pub total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedLanguage {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlLicense {
    #[serde(default)]
    pub spdx_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlRepo {
    pub name: String,
    pub owner: GqlOwner,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub stargazer_count: u64,
    #[serde(default)]
    pub fork_count: u64,
    pub watchers: TotalCount,
    pub issues: TotalCount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub primary_language: Option<NamedLanguage>,
    #[serde(default)]
    pub license_info: Option<GqlLicense>,
    #[serde(default)]
    pub is_fork: bool,
    #[serde(default)]
    pub is_archived: bool,
}

impl GqlRepo {
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> FetchResult<Record> {
        build(
            RecordParts {
                owner: self.owner.login,
                name: self.name,
                description: self.description,
                url: self.url,
                stars: self.stargazer_count,
                forks: self.fork_count,
                watchers: self.watchers.total_count,
                open_issues: self.issues.total_count,
                created_at: self.created_at,
                updated_at: self.updated_at,
                pushed_at: self.pushed_at,
                language: self.primary_language.map(|l| l.name),
                license: self.license_info.and_then(|l| l.spdx_id),
                is_fork: self.is_fork,
                is_archived: self.is_archived,
                owner_location: self.owner.location.filter(|l| !l.trim().is_empty()),
            },
            fetched_at,
        )
    }
}

struct RecordParts {
    owner: String,
    name: String,
    description: Option<String>,
    url: String,
    stars: u64,
    forks: u64,
    watchers: u64,
    open_issues: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pushed_at: Option<DateTime<Utc>>,
    language: Option<String>,
    license: Option<String>,
    is_fork: bool,
    is_archived: bool,
    owner_location: Option<String>,
}

fn build(parts: RecordParts, fetched_at: DateTime<Utc>) -> FetchResult<Record> {
    if parts.owner.trim().is_empty() || parts.name.trim().is_empty() {
        return Err(FetchError::decode("repository without owner or name"));
    }
    // GitHub reports "NOASSERTION" for unrecognized licenses.
    let license = parts.license.filter(|id| id != "NOASSERTION");

    let mut record = Record {
        owner: parts.owner,
        name: parts.name,
        description: parts.description,
        url: parts.url,
        stars: parts.stars,
        forks: parts.forks,
        watchers: parts.watchers,
        open_issues: parts.open_issues,
        created_at: parts.created_at,
        updated_at: parts.updated_at,
        pushed_at: parts.pushed_at,
        last_fetched_at: fetched_at,
        activity_score: 0,
        language: parts.language,
        license,
        is_fork: parts.is_fork,
        is_archived: parts.is_archived,
        owner_location: parts.owner_location,
    };
    record.refresh_derived();
    Ok(record)
}
