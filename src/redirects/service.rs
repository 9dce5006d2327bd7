//! The single write path for the redirect snapshot and its bloom filter.
//!
//! Both artifacts are only ever rebuilt here, together, under one lock, and
//! installed into the live [`RedirectIndex`] as one unit.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::bloom::{FilterStore, ScalableBloomFilter};
use super::resolver::{RedirectIndex, RedirectResolver};
use super::source::{HttpRedirectSource, RedirectSource};
use super::storage::{ArtifactStorage, FsStorage};
use super::table::{RedirectTableCache, TableLoad};
use super::{RedirectError, RedirectTableSnapshot};
use crate::config::RedirectsConfig;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildOutcome {
    /// A new snapshot was fetched and installed
    Refreshed,
    /// The CMS reported no changes
    Unchanged,
    /// The previous index was kept
    Failed,
}

/// Summary of one rebuild, returned to the webhook caller and the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub outcome: RebuildOutcome,
    pub items: usize,
    pub last_access_date: DateTime<Utc>,
    pub filter_persisted: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RedirectService {
    table: RedirectTableCache,
    filters: FilterStore,
    index: Arc<ArcSwap<RedirectIndex>>,
    false_positive_rate: f64,
    metrics: Arc<Metrics>,
    rebuild_lock: Mutex<()>,
}

impl RedirectService {
    pub fn new(
        storage: Arc<dyn ArtifactStorage>,
        source: Arc<dyn RedirectSource>,
        config: &RedirectsConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            table: RedirectTableCache::new(Arc::clone(&storage), source, config.snapshot_path()),
            filters: FilterStore::new(storage, config.filter_path()),
            index: Arc::new(ArcSwap::from_pointee(RedirectIndex::empty())),
            false_positive_rate: config.false_positive_rate,
            metrics,
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Filesystem storage and the HTTP CMS client.
    pub fn from_config(config: &RedirectsConfig, metrics: Arc<Metrics>) -> Self {
        Self::new(
            Arc::new(FsStorage::new()),
            Arc::new(HttpRedirectSource::new(config.cms.clone())),
            config,
            metrics,
        )
    }

    /// Resolver sharing this service's live index.
    pub fn resolver(&self) -> RedirectResolver {
        RedirectResolver::new(Arc::clone(&self.index), Arc::clone(&self.metrics))
    }

    pub fn current(&self) -> Arc<RedirectIndex> {
        self.index.load_full()
    }

    /// Load persisted artifacts at process start. No network access.
    ///
    /// A missing filter leaves lookups unfiltered. A filter built from a
    /// different snapshot is rebuilt from the persisted snapshot.
    pub async fn init(&self) -> Result<(), RedirectError> {
        let _guard = self.rebuild_lock.lock().await;

        let snapshot = match self.table.read_persisted().await? {
            Some(snapshot) => snapshot,
            None => {
                tracing::info!(
                    path = %self.table.snapshot_path().display(),
                    "No persisted redirect snapshot; starting with an empty table"
                );
                self.install(RedirectIndex::empty());
                return Ok(());
            }
        };

        let index = match self.filters.load().await {
            Ok(artifact) if artifact.matches(&snapshot) => {
                match ScalableBloomFilter::from_artifact(&artifact) {
                    Ok(filter) => RedirectIndex::with_filter(snapshot, filter, true),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Persisted bloom filter is invalid; redirect lookups will skip the filter"
                        );
                        RedirectIndex::unfiltered(snapshot)
                    }
                }
            }
            Ok(artifact) => {
                tracing::warn!(
                    filter_built_from = ?artifact.built_from,
                    filter_items = artifact.item_count,
                    snapshot_date = %snapshot.last_access_date,
                    snapshot_items = snapshot.len(),
                    "Persisted bloom filter does not match the snapshot; rebuilding it"
                );
                self.index_with_fresh_filter(snapshot).await.0
            }
            Err(RedirectError::FilterMissing) => {
                tracing::warn!(
                    path = %self.filters.path().display(),
                    "No persisted bloom filter; every redirect lookup will do a full check"
                );
                RedirectIndex::unfiltered(snapshot)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to load bloom filter; every redirect lookup will do a full check"
                );
                RedirectIndex::unfiltered(snapshot)
            }
        };

        tracing::info!(
            items = index.snapshot.len(),
            filter = index.has_filter(),
            last_access_date = %index.snapshot.last_access_date,
            "Redirect index loaded"
        );
        self.install(index);
        Ok(())
    }

    /// Refresh the snapshot from the CMS and rebuild the filter with it.
    ///
    /// Serialized; concurrent callers wait their turn. Never fails: errors
    /// keep the current index and are reported as [`RebuildOutcome::Failed`].
    pub async fn rebuild(&self, force: bool) -> RebuildReport {
        let _guard = self.rebuild_lock.lock().await;
        let started = Instant::now();

        let (outcome, filter_persisted, error) = match self.table.try_load(force).await {
            Ok(TableLoad {
                snapshot,
                refreshed: true,
            }) => {
                let (index, persisted) = self.index_with_fresh_filter(snapshot).await;
                self.install(index);
                self.metrics.increment_rebuild_success();
                (RebuildOutcome::Refreshed, persisted, None)
            }
            Ok(TableLoad {
                snapshot,
                refreshed: false,
            }) => {
                // Storage may hold a newer snapshot than the live one, e.g.
                // one written by a CLI rebuild.
                let persisted = if snapshot.last_access_date != self.index.load().snapshot.last_access_date {
                    let (index, persisted) = self.index_with_fresh_filter(snapshot).await;
                    self.install(index);
                    persisted
                } else {
                    false
                };
                self.metrics.increment_rebuild_unchanged();
                (RebuildOutcome::Unchanged, persisted, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, force, "Redirect rebuild failed; keeping current index");
                self.metrics.increment_rebuild_failure();
                (RebuildOutcome::Failed, false, Some(e.to_string()))
            }
        };

        let current = self.index.load();
        let report = RebuildReport {
            outcome,
            items: current.snapshot.len(),
            last_access_date: current.snapshot.last_access_date,
            filter_persisted,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        };

        tracing::info!(
            outcome = ?report.outcome,
            items = report.items,
            filter_persisted = report.filter_persisted,
            duration_ms = report.duration_ms,
            force,
            "Redirect rebuild finished"
        );
        report
    }

    /// Build a filter from exactly `snapshot`'s keys and persist it.
    ///
    /// A failed persist is logged; the in-memory index is still in sync.
    async fn index_with_fresh_filter(&self, snapshot: RedirectTableSnapshot) -> (RedirectIndex, bool) {
        let filter = match ScalableBloomFilter::from_snapshot(&snapshot, self.false_positive_rate) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build bloom filter; lookups will skip it");
                return (RedirectIndex::unfiltered(snapshot), false);
            }
        };

        let artifact = filter.to_artifact(Some(snapshot.last_access_date));
        let persisted = match self.filters.persist(&artifact).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.filters.path().display(),
                    "Failed to persist bloom filter"
                );
                false
            }
        };

        (RedirectIndex::with_filter(snapshot, filter, true), persisted)
    }

    fn install(&self, index: RedirectIndex) {
        self.metrics
            .set_redirect_index(index.snapshot.len(), index.has_filter());
        self.index.store(Arc::new(index));
    }
}
