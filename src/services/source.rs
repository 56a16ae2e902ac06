// src/services/source.rs

//! The seam between remote sources and the collection pipeline.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use super::rate_limit::RateLimit;
use crate::error::FetchResult;
use crate::models::{QuerySpec, Record, RepoKey};

/// One page of normalized records.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    /// Cursor of the following page; None when the source is exhausted.
    pub next_cursor: Option<String>,
}

/// A paginated, rate-limited source of repository records.
#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Fetch the page at `cursor` (first page when None).
    async fn fetch_page(&self, query: &QuerySpec, cursor: Option<&str>) -> FetchResult<Page>;

    /// Fetch the current state of one repository.
    async fn fetch_repo(&self, key: &RepoKey) -> FetchResult<Record>;

    /// Last observed rate-limit state.
    fn rate_limit(&self) -> RateLimit;
}

/// Where a pagination run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagePosition {
    /// Cursor of the next page to fetch
    pub cursor: Option<String>,
    /// Pages already processed
    pub page: u32,
    /// Records already seen
    pub records_fetched: u64,
}

/// A page as yielded by [`paginate`].
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// 1-based page number
    pub number: u32,
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
    /// Running total including this page
    pub records_fetched: u64,
}

/// Lazily walk pages from `start` until the source is exhausted or
/// `query.max_results` records have been yielded.
///
/// Dropping the stream between items abandons the in-flight page.
pub fn paginate<'a>(
    source: &'a dyn RepoSource,
    query: &'a QuerySpec,
    start: PagePosition,
) -> BoxStream<'a, FetchResult<FetchedPage>> {
    stream::try_unfold(Some(start), move |state| next_page(source, query, state)).boxed()
}

async fn next_page(
    source: &dyn RepoSource,
    query: &QuerySpec,
    state: Option<PagePosition>,
) -> FetchResult<Option<(FetchedPage, Option<PagePosition>)>> {
    let Some(pos) = state else {
        return Ok(None);
    };
    if query.max_results.is_some_and(|max| pos.records_fetched >= max) {
        return Ok(None);
    }

    let page = source.fetch_page(query, pos.cursor.as_deref()).await?;
    let mut records = page.records;
    let mut next_cursor = page.next_cursor;

    if let Some(max) = query.max_results {
        let room = max - pos.records_fetched;
        if records.len() as u64 >= room {
            records.truncate(room as usize);
            next_cursor = None;
        }
    }

    let number = pos.page + 1;
    let records_fetched = pos.records_fetched + records.len() as u64;
    let next_state = next_cursor.clone().map(|cursor| PagePosition {
        cursor: Some(cursor),
        page: number,
        records_fetched,
    });

    Ok(Some((
        FetchedPage {
            number,
            records,
            next_cursor,
            records_fetched,
        },
        next_state,
    )))
}
