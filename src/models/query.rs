// src/models/query.rs

//! Collection query and pagination strategy.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How candidate repositories are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Search accounts by location, then list each account's repositories.
    #[default]
    UserCentric,
    /// One repository search paged by continuation cursor.
    CursorBulk,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCentric => "user_centric",
            Self::CursorBulk => "cursor_bulk",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to collect and how to page through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Location filter matched against account profiles
    #[serde(default = "defaults::location")]
    pub location: String,

    /// Extra search qualifiers or keywords
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Repositories below this star count are ignored
    #[serde(default)]
    pub min_stars: u64,

    /// Results per page (1..=100)
    #[serde(default = "defaults::page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub strategy: Strategy,

    /// Stop after this many records
    #[serde(default)]
    pub max_results: Option<u64>,

    /// Account search cap for the user-centric strategy
    #[serde(default = "defaults::max_accounts")]
    pub max_accounts: u32,

    /// Repositories listed per account
    #[serde(default = "defaults::repos_per_account")]
    pub repos_per_account: u32,

    /// Sort key for the account search
    #[serde(default = "defaults::account_sort")]
    pub account_sort: String,

    #[serde(default)]
    pub include_forks: bool,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            location: defaults::location(),
            keywords: Vec::new(),
            min_stars: 0,
            page_size: defaults::page_size(),
            strategy: Strategy::default(),
            max_results: None,
            max_accounts: defaults::max_accounts(),
            repos_per_account: defaults::repos_per_account(),
            account_sort: defaults::account_sort(),
            include_forks: false,
        }
    }
}

impl QuerySpec {
    /// Repository search string for the cursor strategy.
    pub fn search_query(&self) -> String {
        let mut parts = vec![format!("location:{}", quote(&self.location))];
        if self.min_stars > 0 {
            parts.push(format!("stars:>={}", self.min_stars));
        }
        if !self.include_forks {
            parts.push("fork:false".to_string());
        }
        parts.extend(self.keywords.iter().cloned());
        parts.join(" ")
    }

    /// Account search string for the user-centric strategy.
    pub fn user_query(&self) -> String {
        let mut parts = vec![format!("location:{}", quote(&self.location))];
        parts.extend(self.keywords.iter().cloned());
        parts.join(" ")
    }

    /// Query string for whichever strategy is configured.
    pub fn describe(&self) -> String {
        match self.strategy {
            Strategy::UserCentric => self.user_query(),
            Strategy::CursorBulk => self.search_query(),
        }
    }

    /// Stable checkpoint id for this query. Covers every field that
    /// changes which page a saved cursor points into.
    pub fn task_id(&self) -> String {
        let mut canonical = format!(
            "{}|{}|{}|{}|{}",
            self.strategy,
            self.describe(),
            self.min_stars,
            self.page_size,
            self.include_forks
        );
        if self.strategy == Strategy::UserCentric {
            canonical.push_str(&format!(
                "|{}|{}|{}",
                self.account_sort, self.max_accounts, self.repos_per_account
            ));
        }
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{}_{}", self.strategy, &hex::encode(digest)[..16])
    }
}

fn quote(value: &str) -> String {
    let value = value.trim();
    if value.contains(char::is_whitespace) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

mod defaults {
    pub fn location() -> String {
        "seattle".into()
    }
    pub fn page_size() -> u32 {
        100
    }
    pub fn max_accounts() -> u32 {
        1000
    }
    pub fn repos_per_account() -> u32 {
        100
    }
    pub fn account_sort() -> String {
        "followers".into()
    }
}
