//! Utility functions and helpers.

pub mod fs;
pub mod http;
pub mod shutdown;

use url::Url;

use crate::error::Result;

/// Parse a base URL, making sure relative joins append to its path.
pub fn base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        Ok(Url::parse(trimmed)?)
    } else {
        Ok(Url::parse(&format!("{}/", trimmed))?)
    }
}
