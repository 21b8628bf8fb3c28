//! Per-tag embedding centroids with calibrated thresholds.
//!
//! A [`PrototypeSet`] is born from a full retrain and is immutable once
//! published. Retraining replaces the set wholesale; individual prototypes
//! are never mutated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;

/// A fixed-length embedding vector.
pub type EmbeddingVector = Vec<f32>;

/// A document embedding paired with its true tag set.
///
/// Used both as a training input and as a calibration holdout entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedExample {
    pub document_id: String,
    pub embedding: EmbeddingVector,
    #[serde(default)]
    pub tag_ids: BTreeSet<String>,
}

impl EmbeddedExample {
    pub fn new<I, S>(document_id: impl Into<String>, embedding: EmbeddingVector, tag_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_id: document_id.into(),
            embedding,
            tag_ids: tag_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// One tag's learned centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub tag_id: String,

    pub centroid: EmbeddingVector,

    /// Number of training examples carrying the tag (always >= 1)
    pub example_count: usize,

    /// Decision threshold in [0, 1]
    pub threshold: f32,

    /// False when calibration fell back to the default threshold
    pub calibrated: bool,

    /// True when the centroid was blended with the label embedding
    #[serde(default)]
    pub low_data: bool,

    /// Version of the set this prototype belongs to (0 until published)
    pub version: u64,
}

/// An immutable snapshot of every prototype produced by one retrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrototypeSet {
    pub version: u64,

    pub created_at: DateTime<Utc>,

    pub prototypes: BTreeMap<String, Prototype>,

    /// Embedding of each tag's name + synonyms, used by the shortlist
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_embeddings: BTreeMap<String, EmbeddingVector>,
}

impl PrototypeSet {
    /// Build an unpublished set (version 0).
    pub fn new(
        prototypes: BTreeMap<String, Prototype>,
        label_embeddings: BTreeMap<String, EmbeddingVector>,
    ) -> Self {
        Self {
            version: 0,
            created_at: Utc::now(),
            prototypes,
            label_embeddings,
        }
    }

    /// Stamp the set and all of its prototypes with a version number.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        for prototype in self.prototypes.values_mut() {
            prototype.version = version;
        }
        self
    }

    pub fn get(&self, tag_id: &str) -> Option<&Prototype> {
        self.prototypes.get(tag_id)
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.values()
    }

    /// Embedding dimension, if the set holds any prototype.
    pub fn dimension(&self) -> Option<usize> {
        self.prototypes.values().next().map(|p| p.centroid.len())
    }

    pub fn low_data_count(&self) -> usize {
        self.prototypes.values().filter(|p| p.low_data).count()
    }

    pub fn uncalibrated_count(&self) -> usize {
        self.prototypes.values().filter(|p| !p.calibrated).count()
    }

    /// Flatten into the persisted record shape.
    pub fn records(&self) -> Vec<PrototypeRecord> {
        self.prototypes
            .values()
            .map(|p| PrototypeRecord {
                version: self.version,
                tag_id: p.tag_id.clone(),
                centroid: p.centroid.clone(),
                threshold: p.threshold,
                example_count: p.example_count,
                created_at: self.created_at,
                calibrated: p.calibrated,
                low_data: p.low_data,
            })
            .collect()
    }

    /// Rebuild a set from persisted records.
    ///
    /// All records must share one version and satisfy the prototype
    /// invariants (non-empty centroid, threshold in [0, 1], at least one
    /// example).
    pub fn from_records(
        records: Vec<PrototypeRecord>,
        label_embeddings: BTreeMap<String, EmbeddingVector>,
    ) -> Result<Self, StoreError> {
        let version = records.first().map(|r| r.version).unwrap_or_default();
        let created_at = records.first().map(|r| r.created_at).unwrap_or_else(Utc::now);

        let mut prototypes = BTreeMap::new();
        for record in records {
            if record.version != version {
                return Err(StoreError::Corrupt {
                    tag_id: record.tag_id,
                    reason: format!("record version {} differs from {version}", record.version),
                });
            }
            if record.centroid.is_empty() {
                return Err(StoreError::Corrupt {
                    tag_id: record.tag_id,
                    reason: "empty centroid".into(),
                });
            }
            if !(0.0..=1.0).contains(&record.threshold) {
                return Err(StoreError::Corrupt {
                    tag_id: record.tag_id,
                    reason: format!("threshold {} outside [0, 1]", record.threshold),
                });
            }
            if record.example_count == 0 {
                return Err(StoreError::Corrupt {
                    tag_id: record.tag_id,
                    reason: "zero examples".into(),
                });
            }
            prototypes.insert(
                record.tag_id.clone(),
                Prototype {
                    tag_id: record.tag_id,
                    centroid: record.centroid,
                    example_count: record.example_count,
                    threshold: record.threshold,
                    calibrated: record.calibrated,
                    low_data: record.low_data,
                    version,
                },
            );
        }

        Ok(Self {
            version,
            created_at,
            prototypes,
            label_embeddings,
        })
    }
}

fn default_true() -> bool {
    true
}

/// The persisted shape of one prototype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrototypeRecord {
    pub version: u64,
    pub tag_id: String,
    pub centroid: EmbeddingVector,
    pub threshold: f32,
    pub example_count: usize,
    pub created_at: DateTime<Utc>,

    #[serde(default = "default_true")]
    pub calibrated: bool,

    #[serde(default)]
    pub low_data: bool,
}
