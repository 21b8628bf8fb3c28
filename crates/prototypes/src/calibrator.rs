//! Per-tag decision thresholds calibrated against a holdout set.
//!
//! A tag's threshold is the lowest holdout similarity `t` such that, among
//! holdout documents scoring at or above `t`, the share that truly carries
//! the tag reaches `target_precision`. Raising the target can only shrink
//! the set of qualifying `t`, so calibrated thresholds never decrease.
//!
//! When no `t` qualifies the threshold becomes the larger of the default and
//! the highest holdout score. Every calibrated threshold is a holdout score,
//! so an unreachable target never yields a lower threshold than a reachable
//! one.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use lectag_config::PrototypeConfig;
use lectag_core::{EmbeddedExample, Prototype};
use tracing::{debug, info};

use crate::vector::cosine_similarity;

/// Outcome of calibrating one tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub threshold: f32,
    pub calibrated: bool,
}

#[derive(Debug, Clone)]
pub struct ThresholdCalibrator {
    target_precision: f32,
    default_threshold: f32,
}

impl ThresholdCalibrator {
    pub fn new(target_precision: f32, default_threshold: f32) -> Self {
        Self {
            target_precision,
            default_threshold,
        }
    }

    pub fn from_config(config: &PrototypeConfig) -> Self {
        Self::new(config.target_precision, config.default_threshold)
    }

    /// Calibrate from `(similarity, carries_tag)` pairs.
    pub fn calibrate_scores(&self, scored: &[(f32, bool)]) -> Calibration {
        if !scored.iter().any(|(_, positive)| *positive) {
            return Calibration {
                threshold: self.default_threshold.clamp(0.0, 1.0),
                calibrated: false,
            };
        }

        let mut sorted: Vec<(f32, bool)> = scored.to_vec();
        sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        // Walk distinct scores from high to low. At each boundary the counts
        // cover every document scoring >= the current value.
        let mut best = None;
        let mut true_pos = 0usize;
        let mut total = 0usize;
        let mut i = 0;
        while i < sorted.len() {
            let value = sorted[i].0;
            while i < sorted.len() && sorted[i].0 == value {
                total += 1;
                if sorted[i].1 {
                    true_pos += 1;
                }
                i += 1;
            }
            let precision = true_pos as f32 / total as f32;
            if precision >= self.target_precision {
                best = Some(value);
            }
        }

        match best {
            Some(threshold) => Calibration {
                threshold: threshold.clamp(0.0, 1.0),
                calibrated: true,
            },
            None => {
                let highest = sorted.first().map(|(s, _)| *s).unwrap_or(f32::MIN);
                Calibration {
                    threshold: self.default_threshold.max(highest).clamp(0.0, 1.0),
                    calibrated: false,
                }
            }
        }
    }

    /// Set every prototype's threshold from the holdout documents.
    ///
    /// Tags that cannot reach the target are flagged uncalibrated.
    pub fn calibrate(
        &self,
        prototypes: &mut BTreeMap<String, Prototype>,
        holdout: &[EmbeddedExample],
    ) {
        for (tag_id, prototype) in prototypes.iter_mut() {
            let scored: Vec<(f32, bool)> = holdout
                .iter()
                .map(|doc| {
                    (
                        cosine_similarity(&doc.embedding, &prototype.centroid),
                        doc.tag_ids.contains(tag_id),
                    )
                })
                .collect();
            let calibration = self.calibrate_scores(&scored);
            prototype.threshold = calibration.threshold;
            prototype.calibrated = calibration.calibrated;
            if !calibration.calibrated {
                debug!(tag_id = %tag_id, threshold = calibration.threshold, "Tag left uncalibrated");
            }
        }

        let calibrated = prototypes.values().filter(|p| p.calibrated).count();
        info!(
            holdout = holdout.len(),
            calibrated,
            uncalibrated = prototypes.len() - calibrated,
            target_precision = self.target_precision,
            "Calibrated thresholds"
        );
    }
}

/// The trailing share of `examples` past `train_split`, used as the
/// calibration holdout when none is supplied.
pub fn holdout_tail(examples: &[EmbeddedExample], train_split: f32) -> &[EmbeddedExample] {
    let split = (examples.len() as f64 * train_split.clamp(0.0, 1.0) as f64).floor() as usize;
    &examples[split.min(examples.len())..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator(target: f32) -> ThresholdCalibrator {
        ThresholdCalibrator::new(target, 0.60)
    }

    #[test]
    fn picks_lowest_score_meeting_precision() {
        // >= 0.7: 3/3 positive; >= 0.5: 3/4; >= 0.4: 4/5
        let scored = [(0.9, true), (0.8, true), (0.7, true), (0.5, false), (0.4, true)];
        let c = calibrator(0.80).calibrate_scores(&scored);
        assert!(c.calibrated);
        assert_eq!(c.threshold, 0.4);

        let c = calibrator(0.90).calibrate_scores(&scored);
        assert_eq!(c.threshold, 0.7);
    }

    #[test]
    fn tied_scores_are_counted_together() {
        // both 0.6 documents enter at once: precision 2/3 at 0.6
        let scored = [(0.8, true), (0.6, true), (0.6, false)];
        let c = calibrator(0.9).calibrate_scores(&scored);
        assert_eq!(c.threshold, 0.8);
    }

    #[test]
    fn no_positives_falls_back_to_default() {
        let c = calibrator(0.9).calibrate_scores(&[(0.9, false), (0.2, false)]);
        assert_eq!(c, Calibration { threshold: 0.60, calibrated: false });
        let c = calibrator(0.9).calibrate_scores(&[]);
        assert!(!c.calibrated);
    }

    #[test]
    fn unreachable_target_falls_back_to_highest_score() {
        // the top score is a negative and precision never recovers to 0.9
        let scored = [(0.95, false), (0.9, true), (0.3, false)];
        let c = calibrator(0.9).calibrate_scores(&scored);
        assert!(!c.calibrated);
        assert_eq!(c.threshold, 0.95);

        // the default still wins when every score sits below it
        let scored = [(0.5, false), (0.4, true), (0.35, false)];
        let c = calibrator(0.9).calibrate_scores(&scored);
        assert_eq!(c, Calibration { threshold: 0.60, calibrated: false });
    }

    #[test]
    fn stricter_unreachable_target_keeps_threshold_high() {
        let scored = [(0.9, false), (0.85, true), (0.8, true), (0.75, true), (0.7, true), (0.65, true)];
        let lo = calibrator(0.80).calibrate_scores(&scored);
        assert!(lo.calibrated);
        assert_eq!(lo.threshold, 0.65);

        let hi = calibrator(0.95).calibrate_scores(&scored);
        assert!(!hi.calibrated);
        assert!(hi.threshold >= lo.threshold);
        assert_eq!(hi.threshold, 0.9);
    }

    #[test]
    fn negative_similarity_threshold_is_clamped() {
        let scored = [(-0.2, true), (-0.4, true)];
        let c = calibrator(0.9).calibrate_scores(&scored);
        assert!(c.calibrated);
        assert_eq!(c.threshold, 0.0);
    }

    #[test]
    fn raising_target_never_lowers_threshold() {
        let scored = [
            (0.95, false),
            (0.91, true),
            (0.88, false),
            (0.85, true),
            (0.83, true),
            (0.80, true),
            (0.74, false),
            (0.71, true),
            (0.66, true),
            (0.60, false),
            (0.52, true),
            (0.41, false),
        ];
        // best reachable precision is 2/3; higher targets fall back
        let mut previous = f32::MIN;
        let mut saw_unreachable = false;
        for step in 0..=40 {
            let target = 0.50 + step as f32 * 0.01;
            let c = calibrator(target).calibrate_scores(&scored);
            saw_unreachable |= !c.calibrated;
            assert!(c.threshold >= previous, "threshold dropped at target {target}");
            previous = c.threshold;
        }
        assert!(saw_unreachable);
    }

    #[test]
    fn calibrate_sets_prototype_thresholds() {
        let mut prototypes = BTreeMap::from([(
            "a".to_string(),
            Prototype {
                tag_id: "a".into(),
                centroid: vec![1.0, 0.0],
                example_count: 2,
                threshold: 0.6,
                calibrated: false,
                low_data: false,
                version: 0,
            },
        )]);
        let holdout = vec![
            EmbeddedExample::new("h1", vec![1.0, 0.0], ["a"]),
            EmbeddedExample::new("h2", vec![0.0, 1.0], Vec::<String>::new()),
        ];
        calibrator(0.9).calibrate(&mut prototypes, &holdout);
        assert!(prototypes["a"].calibrated);
        assert_eq!(prototypes["a"].threshold, 1.0);
    }

    #[test]
    fn holdout_tail_takes_trailing_share() {
        let examples: Vec<_> = (0..10)
            .map(|i| EmbeddedExample::new(format!("d{i}"), vec![1.0], ["a"]))
            .collect();
        let tail = holdout_tail(&examples, 0.8);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].document_id, "d8");
        assert!(holdout_tail(&examples, 1.0).is_empty());
    }
}
