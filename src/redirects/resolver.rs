//! Per-request redirect lookup.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;

use super::bloom::ScalableBloomFilter;
use super::{Redirect, RedirectError, RedirectTableSnapshot};
use crate::metrics::Metrics;

/// Snapshot and filter that were built together.
///
/// Swapped as a whole so a request never pairs a filter from one rebuild
/// with a table from another.
#[derive(Debug)]
pub struct RedirectIndex {
    pub snapshot: RedirectTableSnapshot,
    /// `None` means every lookup goes straight to the table.
    pub filter: Option<ScalableBloomFilter>,
    /// The filter was built from exactly this snapshot's keys.
    pub in_sync: bool,
}

impl RedirectIndex {
    pub fn empty() -> Self {
        Self::unfiltered(RedirectTableSnapshot::empty(Utc::now(), false))
    }

    /// Index without a filter; every lookup is a full check.
    pub fn unfiltered(snapshot: RedirectTableSnapshot) -> Self {
        Self {
            snapshot,
            filter: None,
            in_sync: false,
        }
    }

    /// Build the filter from the snapshot's own keys.
    pub fn from_snapshot(
        snapshot: RedirectTableSnapshot,
        error_rate: f64,
    ) -> Result<Self, RedirectError> {
        let filter = ScalableBloomFilter::from_snapshot(&snapshot, error_rate)?;
        Ok(Self {
            snapshot,
            filter: Some(filter),
            in_sync: true,
        })
    }

    /// Pair a snapshot with a filter loaded from storage.
    pub fn with_filter(
        snapshot: RedirectTableSnapshot,
        filter: ScalableBloomFilter,
        in_sync: bool,
    ) -> Self {
        Self {
            snapshot,
            filter: Some(filter),
            in_sync,
        }
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }
}

/// Resolves request paths against the live [`RedirectIndex`].
///
/// Never touches the network or disk; the index is replaced out of band by
/// [`super::RedirectService`].
#[derive(Clone)]
pub struct RedirectResolver {
    index: Arc<ArcSwap<RedirectIndex>>,
    metrics: Arc<Metrics>,
}

impl RedirectResolver {
    pub fn new(index: Arc<ArcSwap<RedirectIndex>>, metrics: Arc<Metrics>) -> Self {
        Self { index, metrics }
    }

    /// Resolver over a fixed index, mostly for tests and tooling.
    pub fn from_index(index: RedirectIndex, metrics: Arc<Metrics>) -> Self {
        Self::new(Arc::new(ArcSwap::from_pointee(index)), metrics)
    }

    /// Redirect rule for `path`, if any.
    ///
    /// The root path never redirects. A negative filter answer is final.
    pub fn resolve(&self, path: &str) -> Option<Redirect> {
        if path == "/" {
            return None;
        }

        let key = path.to_lowercase();
        let index = self.index.load();

        if let Some(filter) = &index.filter {
            if !filter.might_contain(&key) {
                self.metrics.increment_bloom_negative();
                return None;
            }
        }

        match index.snapshot.get(&key) {
            Some(redirect) => {
                self.metrics.increment_redirect_hit();
                Some(redirect.clone())
            }
            None => {
                if index.filter.is_some() {
                    self.metrics.increment_bloom_false_positive();
                    if !index.in_sync {
                        self.metrics.increment_filter_desync();
                    }
                    tracing::warn!(
                        path = %key,
                        in_sync = index.in_sync,
                        snapshot_items = index.snapshot.len(),
                        "Bloom filter positive with no matching redirect rule"
                    );
                }
                None
            }
        }
    }

    /// Current index, for health reporting.
    pub fn current(&self) -> Arc<RedirectIndex> {
        self.index.load_full()
    }
}
