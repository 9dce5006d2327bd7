//! Persisted redirect table snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use super::source::RedirectSource;
use super::storage::ArtifactStorage;
use super::{RedirectError, RedirectTableSnapshot};

/// Result of [`RedirectTableCache::try_load`].
#[derive(Debug, Clone)]
pub struct TableLoad {
    pub snapshot: RedirectTableSnapshot,
    /// A new snapshot was fetched and persisted.
    pub refreshed: bool,
}

/// Fetches the redirect table from the CMS and keeps it on durable storage.
pub struct RedirectTableCache {
    storage: Arc<dyn ArtifactStorage>,
    source: Arc<dyn RedirectSource>,
    snapshot_path: PathBuf,
}

impl RedirectTableCache {
    pub fn new(
        storage: Arc<dyn ArtifactStorage>,
        source: Arc<dyn RedirectSource>,
        snapshot_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            source,
            snapshot_path: snapshot_path.into(),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Read the persisted snapshot without touching the network.
    pub async fn read_persisted(&self) -> Result<Option<RedirectTableSnapshot>, RedirectError> {
        match self.storage.read(&self.snapshot_path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the redirect table, never failing.
    ///
    /// Any fetch, storage or parse failure yields an empty snapshot marked
    /// `is_up_to_date == false` and stamped with the current time.
    pub async fn load(&self, force_update: bool) -> RedirectTableSnapshot {
        match self.try_load(force_update).await {
            Ok(load) => load.snapshot,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    force_update,
                    "Redirect table load failed, continuing with empty table"
                );
                RedirectTableSnapshot::empty(Utc::now(), false)
            }
        }
    }

    /// Load the redirect table, reporting failures and whether it refreshed.
    ///
    /// - not forced and the persisted snapshot is up to date: returned as is
    /// - otherwise the CMS is asked for changes since `last_access_date`; an
    ///   "up to date" answer returns the existing snapshot, anything else
    ///   builds, persists and returns a fresh one
    pub async fn try_load(&self, force_update: bool) -> Result<TableLoad, RedirectError> {
        let existing = match self.read_persisted().await {
            Ok(snapshot) => snapshot,
            Err(RedirectError::Serialization(e)) => {
                tracing::warn!(
                    error = %e,
                    path = %self.snapshot_path.display(),
                    "Persisted redirect snapshot is unreadable, fetching a fresh one"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let existing = match existing {
            Some(snapshot) if !force_update && snapshot.is_up_to_date => {
                return Ok(TableLoad {
                    snapshot,
                    refreshed: false,
                });
            }
            other => other,
        };

        let since = existing.as_ref().map(|s| s.last_access_date);
        let feed = self.source.fetch_redirects(since).await?;
        // Prefer the CMS clock for the cursor so local skew cannot skip edits
        let now = feed.server_time.unwrap_or_else(Utc::now);

        if feed.is_up_to_date {
            tracing::debug!(since = ?since, "CMS reports redirect table unchanged");
            return Ok(TableLoad {
                snapshot: existing.unwrap_or_else(|| RedirectTableSnapshot::empty(now, true)),
                refreshed: false,
            });
        }

        let snapshot = RedirectTableSnapshot::from_rules(feed.redirects, now);
        let data = serde_json::to_vec(&snapshot)?;
        self.storage
            .write_atomic(&self.snapshot_path, Bytes::from(data))
            .await?;

        tracing::info!(
            items = snapshot.len(),
            path = %self.snapshot_path.display(),
            "Persisted refreshed redirect table"
        );

        Ok(TableLoad {
            snapshot,
            refreshed: true,
        })
    }
}
