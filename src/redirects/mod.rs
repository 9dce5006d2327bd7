//! Redirect table, bloom filter and resolver.
//!
//! The CMS owns a large, frequently edited origin → destination redirect
//! table. This module keeps a persisted snapshot of it, a bloom filter over
//! its origin keys, and resolves request paths against both:
//!
//! - [`table::RedirectTableCache`] fetches and persists the snapshot
//! - [`bloom::ScalableBloomFilter`] answers "definitely not redirected"
//! - [`resolver::RedirectResolver`] combines them per request
//! - [`service::RedirectService`] is the single write path that rebuilds
//!   snapshot and filter together and swaps them in as one unit

pub mod bloom;
pub mod resolver;
pub mod service;
pub mod source;
pub mod storage;
pub mod table;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEFAULT_REDIRECT_STATUS;
use crate::locale::is_external_url;

pub use bloom::{FilterArtifact, FilterStore, ScalableBloomFilter};
pub use resolver::{RedirectIndex, RedirectResolver};
pub use service::{RebuildOutcome, RebuildReport, RedirectService};
pub use source::{CmsError, HttpRedirectSource, RawRedirect, RedirectFeed, RedirectSource};
pub use storage::{ArtifactStorage, FsStorage, MemoryStorage};
pub use table::{RedirectTableCache, TableLoad};

/// Errors from the redirect subsystem.
///
/// None of these reach request handling; callers fall back to "no redirect".
#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("No persisted bloom filter found")]
    FilterMissing,

    #[error("Invalid bloom filter artifact: {0}")]
    InvalidFilter(String),
}

/// A single redirect rule keyed by its normalized origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub id: u64,
    pub origin_key: String,
    pub destination_url: String,
    pub status_code: u16,
}

impl Redirect {
    /// Status to answer with; rules without a redirect status are permanent.
    pub fn effective_status(&self) -> u16 {
        match self.status_code {
            301 | 302 | 303 | 307 | 308 => self.status_code,
            _ => DEFAULT_REDIRECT_STATUS,
        }
    }

    /// Relative destinations stay on the current host.
    pub fn is_relative(&self) -> bool {
        !is_external_url(&self.destination_url)
    }
}

/// Full redirect table as of `last_access_date`.
///
/// Replaced wholesale on refresh, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectTableSnapshot {
    pub last_access_date: DateTime<Utc>,
    pub is_up_to_date: bool,
    pub items: HashMap<String, Redirect>,
}

impl RedirectTableSnapshot {
    /// Empty snapshot; `is_up_to_date == false` marks a failed or missing load.
    pub fn empty(now: DateTime<Utc>, is_up_to_date: bool) -> Self {
        Self {
            last_access_date: now,
            is_up_to_date,
            items: HashMap::new(),
        }
    }

    /// Build a snapshot from raw CMS rules, normalizing every origin.
    ///
    /// Later rules win when two origins normalize to the same key.
    pub fn from_rules<I>(rules: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = RawRedirect>,
    {
        let mut items = HashMap::new();
        for rule in rules {
            let origin_key = normalize_origin_key(&rule.origin_url);
            if origin_key.is_empty() {
                tracing::debug!(redirect_id = rule.id, "Skipping redirect with empty origin");
                continue;
            }
            let redirect = Redirect {
                id: rule.id,
                origin_key: origin_key.clone(),
                destination_url: rule.destination_url,
                status_code: rule.status_code,
            };
            if let Some(previous) = items.insert(origin_key, redirect) {
                tracing::debug!(
                    origin = %previous.origin_key,
                    replaced_id = previous.id,
                    "Duplicate redirect origin after normalization"
                );
            }
        }

        Self {
            last_access_date: now,
            is_up_to_date: true,
            items,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Redirect> {
        self.items.get(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Normalize a CMS origin into a lookup key.
///
/// Trims whitespace, collapses a leading `~/` to `/`, reduces absolute and
/// protocol-relative URLs to their path-and-beyond, collapses repeated
/// leading slashes and lowercases. Idempotent.
pub fn normalize_origin_key(raw: &str) -> String {
    let trimmed = raw.trim();

    let collapsed = match trimmed.strip_prefix("~/") {
        Some(rest) => format!("/{}", rest),
        None => trimmed.to_string(),
    };

    let path = strip_authority(&collapsed);

    let path = if path.starts_with("//") {
        format!("/{}", path.trim_start_matches('/'))
    } else {
        path
    };

    path.to_lowercase()
}

/// Reduce `scheme://host/rest` and `//host/rest` to `/rest`.
fn strip_authority(url: &str) -> String {
    let after_scheme = if url.starts_with("//") {
        Some(&url[2..])
    } else {
        url.find("://").and_then(|idx| {
            let scheme = &url[..idx];
            let valid = scheme
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            valid.then(|| &url[idx + 3..])
        })
    };

    match after_scheme {
        None => url.to_string(),
        Some(rest) => match rest.find(['/', '?', '#']) {
            Some(i) if rest[i..].starts_with('/') => rest[i..].to_string(),
            Some(i) => format!("/{}", &rest[i..]),
            None => "/".to_string(),
        },
    }
}
