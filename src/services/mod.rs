//! Service layer for remote repository sources.
//!
//! This module contains:
//! - The `RepoSource` seam and the `paginate` stream (`source`)
//! - The GitHub REST/GraphQL client (`GitHubClient`)
//! - Rate-limit introspection (`RateLimit`)
//! - Wire-shape normalization into `Record` (`normalize`)

mod github;
pub mod normalize;
mod rate_limit;
mod source;

pub use github::{GitHubClient, SEARCH_RESULT_CEILING};
pub use rate_limit::RateLimit;
pub use source::{FetchedPage, Page, PagePosition, RepoSource, paginate};

#[cfg(test)]
pub(crate) use source::fake::FakeSource;
