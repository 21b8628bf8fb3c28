//! Prototype construction from labelled example embeddings.
//!
//! Each tag's centroid is the mean of the embeddings of every example that
//! carries it. Tags with fewer than `low_data_threshold` examples are blended
//! with their label embedding. Tags without examples get no prototype.

use std::collections::BTreeMap;

use lectag_config::PrototypeConfig;
use lectag_core::error::TrainingError;
use lectag_core::{EmbeddedExample, EmbeddingVector, Prototype, TagCatalog};
use tracing::{debug, info, warn};

use crate::vector;

/// Builds uncalibrated prototypes. Thresholds start at the configured
/// default and are set by [`crate::ThresholdCalibrator`].
#[derive(Debug, Clone)]
pub struct PrototypeBuilder {
    config: PrototypeConfig,
}

impl PrototypeBuilder {
    pub fn new(config: PrototypeConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        examples: &[EmbeddedExample],
        catalog: &TagCatalog,
        label_embeddings: &BTreeMap<String, EmbeddingVector>,
    ) -> Result<BTreeMap<String, Prototype>, TrainingError> {
        let dimension = check_dimensions(examples)?;

        let mut members: BTreeMap<&str, Vec<&[f32]>> = BTreeMap::new();
        for example in examples {
            for tag_id in &example.tag_ids {
                if !catalog.contains(tag_id) {
                    debug!(tag_id = %tag_id, document_id = %example.document_id, "Ignoring unknown tag");
                    continue;
                }
                members
                    .entry(tag_id.as_str())
                    .or_default()
                    .push(example.embedding.as_slice());
            }
        }

        if members.is_empty() {
            return Err(TrainingError::NoExamples);
        }

        let mut prototypes = BTreeMap::new();
        for (tag_id, vectors) in members {
            let Some(centroid) = vector::mean(&vectors) else {
                continue;
            };

            let example_count = vectors.len();
            let low_data = example_count < self.config.low_data_threshold;
            let centroid = if low_data {
                self.blend_with_label(tag_id, centroid, label_embeddings.get(tag_id))
            } else {
                centroid
            };

            prototypes.insert(
                tag_id.to_string(),
                Prototype {
                    tag_id: tag_id.to_string(),
                    centroid,
                    example_count,
                    threshold: self.config.default_threshold,
                    calibrated: false,
                    low_data,
                    version: 0,
                },
            );
        }

        let low_data = prototypes.values().filter(|p| p.low_data).count();
        info!(
            prototypes = prototypes.len(),
            examples = examples.len(),
            dimension,
            low_data,
            "Built tag prototypes"
        );
        Ok(prototypes)
    }

    fn blend_with_label(
        &self,
        tag_id: &str,
        centroid: EmbeddingVector,
        label: Option<&EmbeddingVector>,
    ) -> EmbeddingVector {
        let Some(label) = label else {
            debug!(tag_id, "Low-data tag has no label embedding, keeping raw centroid");
            return centroid;
        };
        match vector::blend(
            &centroid,
            self.config.prototype_weight,
            label,
            self.config.label_weight,
        ) {
            Some(blended) => blended,
            None => {
                warn!(tag_id, "Label embedding dimension differs from centroid, not blending");
                centroid
            }
        }
    }
}

/// All embeddings must be non-empty and share one dimension.
fn check_dimensions(examples: &[EmbeddedExample]) -> Result<usize, TrainingError> {
    let Some(first) = examples.first() else {
        return Err(TrainingError::NoExamples);
    };
    let expected = first.embedding.len();
    for example in examples {
        if example.embedding.is_empty() {
            return Err(TrainingError::EmptyEmbedding(example.document_id.clone()));
        }
        if example.embedding.len() != expected {
            return Err(TrainingError::DimensionMismatch {
                document_id: example.document_id.clone(),
                expected,
                found: example.embedding.len(),
            });
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectag_core::{Category, Tag};

    fn catalog() -> TagCatalog {
        TagCatalog::new([
            Tag::new("a", "A", Category::Topic),
            Tag::new("b", "B", Category::Tone),
            Tag::new("c", "C", Category::Format),
        ])
    }

    fn builder(low_data_threshold: usize) -> PrototypeBuilder {
        PrototypeBuilder::new(PrototypeConfig {
            low_data_threshold,
            ..PrototypeConfig::default()
        })
    }

    fn examples() -> Vec<EmbeddedExample> {
        vec![
            EmbeddedExample::new("d1", vec![1.0, 0.0, 0.0], ["a"]),
            EmbeddedExample::new("d2", vec![0.8, 0.2, 0.0], ["a", "b"]),
            EmbeddedExample::new("d3", vec![0.0, 1.0, 0.1], ["b"]),
            EmbeddedExample::new("d4", vec![0.3, 0.3, 0.9], ["a"]),
        ]
    }

    #[test]
    fn centroid_is_mean_of_tagged_examples() {
        let prototypes = builder(0).build(&examples(), &catalog(), &BTreeMap::new()).unwrap();
        let b = &prototypes["b"];
        assert_eq!(b.example_count, 2);
        assert!((b.centroid[0] - 0.4).abs() < 1e-6);
        assert!((b.centroid[1] - 0.6).abs() < 1e-6);
        assert!((b.centroid[2] - 0.05).abs() < 1e-6);
        assert!(!b.low_data);
        assert!(!b.calibrated);
    }

    #[test]
    fn tags_without_examples_are_omitted() {
        let prototypes = builder(0).build(&examples(), &catalog(), &BTreeMap::new()).unwrap();
        assert!(prototypes.contains_key("a"));
        assert!(!prototypes.contains_key("c"));
    }

    #[test]
    fn permuted_input_gives_identical_centroids() {
        let forward = builder(5).build(&examples(), &catalog(), &BTreeMap::new()).unwrap();
        let mut reversed = examples();
        reversed.reverse();
        reversed.swap(0, 2);
        let permuted = builder(5).build(&reversed, &catalog(), &BTreeMap::new()).unwrap();

        for (tag_id, p) in &forward {
            let bits: Vec<u32> = p.centroid.iter().map(|x| x.to_bits()).collect();
            let other: Vec<u32> = permuted[tag_id].centroid.iter().map(|x| x.to_bits()).collect();
            assert_eq!(bits, other, "centroid for {tag_id} changed under permutation");
        }
    }

    #[test]
    fn low_data_tag_is_blended_with_label() {
        let labels = BTreeMap::from([("b".to_string(), vec![0.0, 0.0, 1.0])]);
        let prototypes = builder(5).build(&examples(), &catalog(), &labels).unwrap();
        let b = &prototypes["b"];
        assert!(b.low_data);
        // 0.8 * [0.4, 0.6, 0.05] + 0.2 * [0, 0, 1]
        assert!((b.centroid[0] - 0.32).abs() < 1e-6);
        assert!((b.centroid[1] - 0.48).abs() < 1e-6);
        assert!((b.centroid[2] - 0.24).abs() < 1e-6);

        // no label embedding for "a": raw centroid, still flagged low-data
        let a = &prototypes["a"];
        assert!(a.low_data);
        assert!((a.centroid[0] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn zero_examples_is_fatal() {
        let err = builder(5).build(&[], &catalog(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TrainingError::NoExamples));
    }

    #[test]
    fn examples_with_only_unknown_tags_are_fatal() {
        let examples = vec![EmbeddedExample::new("d1", vec![1.0], ["zzz"])];
        let err = builder(5).build(&examples, &catalog(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TrainingError::NoExamples));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut examples = examples();
        examples.push(EmbeddedExample::new("d5", vec![1.0, 2.0], ["a"]));
        let err = builder(5).build(&examples, &catalog(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TrainingError::DimensionMismatch { found: 2, .. }));
    }
}
