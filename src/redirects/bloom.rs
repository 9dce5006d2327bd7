//! Scalable bloom filter over normalized redirect origins.
//!
//! A plain bloom filter has to be sized up front. This one stacks
//! `bloomfilter::Bloom` layers: when the newest layer reaches its capacity a
//! new layer is added with twice the capacity and half the error rate, so
//! the compound false-positive rate stays below twice the target however far
//! the set grows.
//!
//! The filter never produces false negatives. It is rebuilt from scratch with
//! every refreshed redirect snapshot and never patched rule by rule.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bloomfilter::Bloom;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::storage::ArtifactStorage;
use super::{RedirectError, RedirectTableSnapshot};
use crate::constants::{BLOOM_ARTIFACT_VERSION, BLOOM_GROWTH_FACTOR, BLOOM_TIGHTENING_RATIO};

struct BloomLayer {
    bloom: Bloom<str>,
    capacity: usize,
    count: usize,
    error_rate: f64,
}

impl BloomLayer {
    fn new(capacity: usize, error_rate: f64) -> Result<Self, RedirectError> {
        let bloom = Bloom::new_for_fp_rate(capacity, error_rate)
            .map_err(|e| RedirectError::InvalidFilter(e.to_string()))?;
        Ok(Self {
            bloom,
            capacity,
            count: 0,
            error_rate,
        })
    }

    fn is_full(&self) -> bool {
        self.count >= self.capacity
    }
}

/// Growable probabilistic set of strings.
pub struct ScalableBloomFilter {
    error_rate: f64,
    layers: Vec<BloomLayer>,
}

impl std::fmt::Debug for ScalableBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalableBloomFilter")
            .field("error_rate", &self.error_rate)
            .field("layers", &self.layers.len())
            .field("len", &self.len())
            .finish()
    }
}

impl ScalableBloomFilter {
    /// Empty filter whose first layer holds `initial_capacity` items.
    pub fn new(initial_capacity: usize, error_rate: f64) -> Result<Self, RedirectError> {
        if !(error_rate > 0.0 && error_rate < 1.0) {
            return Err(RedirectError::InvalidFilter(format!(
                "error rate {} must be between 0 and 1",
                error_rate
            )));
        }
        let first = BloomLayer::new(initial_capacity.max(1), error_rate)?;
        Ok(Self {
            error_rate,
            layers: vec![first],
        })
    }

    /// Build a filter sized for exactly `keys` and insert all of them.
    pub fn build<I, S>(keys: I, error_rate: f64) -> Result<Self, RedirectError>
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: ExactSizeIterator,
        S: AsRef<str>,
    {
        let keys = keys.into_iter();
        let mut filter = Self::new(keys.len(), error_rate)?;
        for key in keys {
            filter.insert(key.as_ref())?;
        }
        Ok(filter)
    }

    /// Build from the origin keys of a snapshot.
    pub fn from_snapshot(
        snapshot: &RedirectTableSnapshot,
        error_rate: f64,
    ) -> Result<Self, RedirectError> {
        Self::build(snapshot.items.keys(), error_rate)
    }

    /// Insert a key, growing a new layer when the current one is full.
    pub fn insert(&mut self, key: &str) -> Result<(), RedirectError> {
        if self.might_contain(key) {
            return Ok(());
        }

        let needs_layer = self.layers.last().map_or(true, BloomLayer::is_full);
        if needs_layer {
            let (capacity, error_rate) = match self.layers.last() {
                Some(last) => (
                    last.capacity.saturating_mul(BLOOM_GROWTH_FACTOR),
                    last.error_rate * BLOOM_TIGHTENING_RATIO,
                ),
                None => (1, self.error_rate),
            };
            self.layers.push(BloomLayer::new(capacity, error_rate)?);
        }

        if let Some(layer) = self.layers.last_mut() {
            layer.bloom.set(key);
            layer.count += 1;
        }
        Ok(())
    }

    /// `false` means the key is definitely absent.
    pub fn might_contain(&self, key: &str) -> bool {
        self.layers.iter().any(|layer| layer.bloom.check(key))
    }

    /// Number of distinct insertions (false-positive duplicates excluded).
    pub fn len(&self) -> usize {
        self.layers.iter().map(|l| l.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Serialize, recording which snapshot the filter was built from.
    pub fn to_artifact(&self, built_from: Option<DateTime<Utc>>) -> FilterArtifact {
        FilterArtifact {
            version: BLOOM_ARTIFACT_VERSION,
            error_rate: self.error_rate,
            item_count: self.len(),
            built_from,
            layers: self
                .layers
                .iter()
                .map(|layer| LayerArtifact {
                    capacity: layer.capacity,
                    count: layer.count,
                    error_rate: layer.error_rate,
                    bits: STANDARD.encode(layer.bloom.to_bytes()),
                })
                .collect(),
        }
    }

    pub fn from_artifact(artifact: &FilterArtifact) -> Result<Self, RedirectError> {
        if artifact.version != BLOOM_ARTIFACT_VERSION {
            return Err(RedirectError::InvalidFilter(format!(
                "unsupported artifact version {}",
                artifact.version
            )));
        }
        if artifact.layers.is_empty() {
            return Err(RedirectError::InvalidFilter("artifact has no layers".to_string()));
        }

        let mut layers = Vec::with_capacity(artifact.layers.len());
        for layer in &artifact.layers {
            let bytes = STANDARD
                .decode(&layer.bits)
                .map_err(|e| RedirectError::InvalidFilter(e.to_string()))?;
            let bloom = Bloom::from_bytes(bytes)
                .map_err(|e| RedirectError::InvalidFilter(e.to_string()))?;
            layers.push(BloomLayer {
                bloom,
                capacity: layer.capacity,
                count: layer.count,
                error_rate: layer.error_rate,
            });
        }

        Ok(Self {
            error_rate: artifact.error_rate,
            layers,
        })
    }
}

/// JSON form of a persisted filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterArtifact {
    pub version: u32,
    pub error_rate: f64,
    pub item_count: usize,
    /// `last_access_date` of the snapshot this filter was built from
    pub built_from: Option<DateTime<Utc>>,
    pub layers: Vec<LayerArtifact>,
}

impl FilterArtifact {
    /// True when this filter was built from `snapshot`.
    pub fn matches(&self, snapshot: &RedirectTableSnapshot) -> bool {
        self.built_from == Some(snapshot.last_access_date) && self.item_count == snapshot.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerArtifact {
    pub capacity: usize,
    pub count: usize,
    pub error_rate: f64,
    /// base64 of the layer's native byte serialization
    pub bits: String,
}

/// Persists and loads the filter artifact.
pub struct FilterStore {
    storage: Arc<dyn ArtifactStorage>,
    path: PathBuf,
}

impl FilterStore {
    pub fn new(storage: Arc<dyn ArtifactStorage>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn persist(&self, artifact: &FilterArtifact) -> Result<(), RedirectError> {
        let data = serde_json::to_vec(artifact)?;
        self.storage.write_atomic(&self.path, Bytes::from(data)).await
    }

    /// Load the persisted artifact; [`RedirectError::FilterMissing`] if none
    /// was ever built.
    pub async fn load(&self) -> Result<FilterArtifact, RedirectError> {
        match self.storage.read(&self.path).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(RedirectError::FilterMissing),
        }
    }
}
