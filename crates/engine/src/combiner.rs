//! Weighted ensemble of reasoning confidence and prototype similarity.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use lectag_config::EnsembleConfig;
use lectag_core::{CategoryJudgments, Suggestion, SuggestionSource};
use lectag_prototypes::{SimilarityEntry, SimilarityRanking};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EnsembleCombiner {
    config: EnsembleConfig,
}

struct Judged<'a> {
    confidence: f32,
    rationale: &'a str,
}

impl EnsembleCombiner {
    pub fn new(config: EnsembleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Merge one document's category judgments with its similarity ranking.
    pub fn combine(
        &self,
        document_id: &str,
        judgments: &CategoryJudgments,
        ranking: &SimilarityRanking,
    ) -> Vec<Suggestion> {
        if judgments.is_empty() {
            return self.backfill(document_id, ranking).into_iter().collect();
        }

        // a tag judged under several categories keeps its highest confidence
        let mut judged: BTreeMap<&str, Judged<'_>> = BTreeMap::new();
        for (_, j) in judgments.iter() {
            let better = judged
                .get(j.tag_id.as_str())
                .is_none_or(|prev| j.confidence > prev.confidence);
            if better {
                judged.insert(
                    j.tag_id.as_str(),
                    Judged {
                        confidence: j.confidence,
                        rationale: &j.rationale,
                    },
                );
            }
        }

        let candidates: BTreeSet<&str> = judged
            .keys()
            .copied()
            .chain(ranking.above_threshold().map(|e| e.tag_id.as_str()))
            .collect();

        let mut suggestions: Vec<Suggestion> = candidates
            .into_iter()
            .map(|tag_id| self.score_one(document_id, tag_id, judged.get(tag_id), ranking.get(tag_id)))
            .collect();
        sort_suggestions(&mut suggestions);

        let passing = suggestions
            .iter()
            .take_while(|s| s.combined_score >= self.config.min_combined_score)
            .count();
        let keep = passing.max(self.config.min_k.min(suggestions.len()));
        suggestions.truncate(keep.min(self.config.top_k));

        debug!(
            document_id,
            judged = judged.len(),
            kept = suggestions.len(),
            "Combined suggestions"
        );
        suggestions
    }

    fn score_one(
        &self,
        document_id: &str,
        tag_id: &str,
        judged: Option<&Judged<'_>>,
        entry: Option<&SimilarityEntry>,
    ) -> Suggestion {
        let cfg = &self.config;
        let reasoning = judged.map(|j| j.confidence);
        let prototype = entry.map(|e| e.similarity);
        let threshold = entry.map(|e| e.threshold).unwrap_or(cfg.default_threshold);

        let r = reasoning.unwrap_or(0.0);
        let p = prototype.unwrap_or(0.0);
        let mut combined = cfg.reasoning_weight * r + cfg.prototype_weight * p;

        let agreement = r > 0.0 && p > 0.0 && p >= threshold - cfg.agreement_margin;
        if agreement {
            combined += cfg.agreement_bonus;
        }

        let source = match (reasoning, prototype) {
            (Some(_), Some(_)) => SuggestionSource::ReasoningPrototype,
            (Some(_), None) => SuggestionSource::ReasoningOnly,
            (None, _) => SuggestionSource::PrototypeOnly,
        };

        Suggestion {
            document_id: document_id.to_string(),
            tag_id: tag_id.to_string(),
            combined_score: combined.min(1.0),
            reasoning_score: reasoning,
            prototype_score: prototype,
            threshold,
            agreement_bonus_applied: agreement,
            source,
            rationale: judged
                .map(|j| j.rationale.trim())
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        }
    }

    /// The single best threshold-clearing prototype, used when reasoning
    /// judged nothing at all.
    fn backfill(&self, document_id: &str, ranking: &SimilarityRanking) -> Option<Suggestion> {
        let entry = ranking.above_threshold().next()?;
        debug!(document_id, tag_id = %entry.tag_id, "Backfilled from prototypes");
        Some(Suggestion {
            document_id: document_id.to_string(),
            tag_id: entry.tag_id.clone(),
            combined_score: (self.config.prototype_weight * entry.similarity).min(1.0),
            reasoning_score: None,
            prototype_score: Some(entry.similarity),
            threshold: entry.threshold,
            agreement_bonus_applied: false,
            source: SuggestionSource::Backfill,
            rationale: None,
        })
    }
}

pub(crate) fn sort_suggestions(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.tag_id.cmp(&b.tag_id))
    });
}
