//! Prototype learning for lectag.
//!
//! Turns labelled example embeddings into per-tag centroids, calibrates a
//! decision threshold per tag, scores documents against the result, and
//! keeps published sets versioned in memory and (optionally) on disk.

pub mod vector;
pub mod builder;
pub mod calibrator;
pub mod scorer;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod archive;

use std::collections::BTreeMap;

use lectag_config::PrototypeConfig;
use lectag_core::error::TrainingError;
use lectag_core::{EmbeddedExample, EmbeddingVector, PrototypeSet, TagCatalog};

pub use builder::PrototypeBuilder;
pub use calibrator::{Calibration, ThresholdCalibrator, holdout_tail};
pub use scorer::{SimilarityEntry, SimilarityRanking, score, score_labels};
pub use store::{PrototypeStore, VersionInfo};
pub use vector::cosine_similarity;

#[cfg(feature = "sqlite")]
pub use archive::{ArchivedVersion, PrototypeArchive};

/// Build and calibrate an unpublished prototype set.
///
/// Centroids are learned from every example. Thresholds are calibrated on
/// `holdout` when given, otherwise on the examples past
/// `config.train_holdout_split`.
pub fn build_prototypes(
    examples: &[EmbeddedExample],
    catalog: &TagCatalog,
    label_embeddings: BTreeMap<String, EmbeddingVector>,
    holdout: Option<&[EmbeddedExample]>,
    config: &PrototypeConfig,
) -> Result<PrototypeSet, TrainingError> {
    let mut prototypes =
        PrototypeBuilder::new(config.clone()).build(examples, catalog, &label_embeddings)?;

    let holdout = holdout.unwrap_or_else(|| holdout_tail(examples, config.train_holdout_split));
    ThresholdCalibrator::from_config(config).calibrate(&mut prototypes, holdout);

    Ok(PrototypeSet::new(prototypes, label_embeddings))
}
