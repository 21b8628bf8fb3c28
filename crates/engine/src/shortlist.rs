//! Recall-first candidate shortlist for the reasoning step.
//!
//! The shortlist is the union of several cheap signals: prototype
//! similarity, label similarity, keyword matches and the lecturer's tag
//! history. It is trimmed by a blended score and topped up by similarity when
//! it comes out too small. It only bounds what reasoning looks at; it never
//! filters the similarity ranking itself.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use lectag_config::ShortlistConfig;
use lectag_core::{Category, Document, Tag, TagCatalog, TrainingExample};
use lectag_prototypes::SimilarityRanking;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-lecturer tag frequencies, normalized to sum to 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LecturerHistory {
    by_lecturer: BTreeMap<String, BTreeMap<String, f32>>,
}

impl LecturerHistory {
    pub fn from_examples(examples: &[TrainingExample]) -> Self {
        let mut counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for example in examples {
            let Some(lecturer) = example.lecturer.as_deref().filter(|l| !l.trim().is_empty()) else {
                continue;
            };
            if example.assigned_tag_ids.is_empty() {
                continue;
            }
            let tags = counts.entry(lecturer.to_string()).or_default();
            for tag_id in &example.assigned_tag_ids {
                *tags.entry(tag_id.clone()).or_default() += 1;
            }
        }

        let by_lecturer = counts
            .into_iter()
            .map(|(lecturer, tags)| {
                let total: usize = tags.values().sum();
                let freqs = tags
                    .into_iter()
                    .map(|(tag_id, n)| (tag_id, n as f32 / total as f32))
                    .collect();
                (lecturer, freqs)
            })
            .collect();
        Self { by_lecturer }
    }

    pub fn priors(&self, lecturer: &str) -> Option<&BTreeMap<String, f32>> {
        self.by_lecturer.get(lecturer)
    }

    pub fn is_empty(&self) -> bool {
        self.by_lecturer.is_empty()
    }
}

/// The candidate tags handed to reasoning, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shortlist {
    pub tag_ids: Vec<String>,
    pub keyword_hits: BTreeSet<String>,
    /// No keyword hit and weak similarity everywhere
    pub hard: bool,
}

impl Shortlist {
    pub fn contains(&self, tag_id: &str) -> bool {
        self.tag_ids.iter().any(|t| t == tag_id)
    }

    pub fn len(&self) -> usize {
        self.tag_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_ids.is_empty()
    }

    /// Shortlisted tags of one category, in shortlist order.
    pub fn tags_in(&self, category: Category, catalog: &TagCatalog) -> Vec<Tag> {
        self.tag_ids
            .iter()
            .filter_map(|id| catalog.get(id))
            .filter(|t| t.category == category)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ShortlistSelector {
    config: ShortlistConfig,
}

impl ShortlistSelector {
    pub fn new(config: ShortlistConfig) -> Self {
        Self { config }
    }

    /// Select candidates for one document.
    ///
    /// `label_scores` is the document's ranking against tag label
    /// embeddings; it may be empty.
    pub fn select(
        &self,
        document: &Document,
        catalog: &TagCatalog,
        ranking: &SimilarityRanking,
        label_scores: &[(String, f32)],
        history: Option<&LecturerHistory>,
    ) -> Shortlist {
        let cfg = &self.config;

        let proto: Vec<(&str, f32)> = ranking
            .iter()
            .filter(|e| catalog.contains(&e.tag_id))
            .map(|e| (e.tag_id.as_str(), e.similarity))
            .collect();
        let label: Vec<(&str, f32)> = label_scores
            .iter()
            .filter(|(id, _)| catalog.contains(id))
            .map(|(id, s)| (id.as_str(), *s))
            .collect();
        let priors: Vec<(&str, f32)> = document
            .lecturer
            .as_deref()
            .and_then(|l| history.and_then(|h| h.priors(l)))
            .map(|p| {
                let mut v: Vec<(&str, f32)> = p
                    .iter()
                    .filter(|(id, _)| catalog.contains(id))
                    .map(|(id, s)| (id.as_str(), *s))
                    .collect();
                v.sort_by(by_score_then_id);
                v
            })
            .unwrap_or_default();
        let keyword_hits = keyword_hits(document, catalog);

        let mut candidates: BTreeSet<&str> = keyword_hits.iter().map(String::as_str).collect();
        candidates.extend(proto.iter().take(cfg.k_proto).map(|(id, _)| *id));
        candidates.extend(proto.iter().filter(|(_, s)| *s >= cfg.proto_threshold).map(|(id, _)| *id));
        candidates.extend(label.iter().take(cfg.k_label).map(|(id, _)| *id));
        candidates.extend(label.iter().filter(|(_, s)| *s >= cfg.label_threshold).map(|(id, _)| *id));
        candidates.extend(priors.iter().take(cfg.k_prior).map(|(id, _)| *id));

        let max_proto = proto.first().map(|(_, s)| *s).unwrap_or(0.0);
        let max_label = label.first().map(|(_, s)| *s).unwrap_or(0.0);
        let hard = keyword_hits.is_empty()
            && max_proto < cfg.hard_threshold
            && max_label < cfg.hard_threshold;
        if hard {
            candidates.extend(proto.iter().take(cfg.hard_expansion).map(|(id, _)| *id));
            candidates.extend(label.iter().take(cfg.hard_expansion).map(|(id, _)| *id));
        }

        let proto_of: BTreeMap<&str, f32> = proto.iter().copied().collect();
        let label_of: BTreeMap<&str, f32> = label.iter().copied().collect();
        let prior_of: BTreeMap<&str, f32> = priors.iter().copied().collect();
        let blended = |id: &str| {
            0.7 * proto_of.get(id).copied().unwrap_or(0.0)
                + 0.2 * label_of.get(id).copied().unwrap_or(0.0)
                + 0.05 * prior_of.get(id).copied().unwrap_or(0.0)
                + if keyword_hits.contains(id) { 0.05 } else { 0.0 }
        };

        let mut ranked: Vec<(&str, f32)> = candidates.into_iter().map(|id| (id, blended(id))).collect();
        ranked.sort_by(by_score_then_id);
        let cap = if hard { cfg.hard_max_candidates } else { cfg.max_candidates };
        ranked.truncate(cap);

        let mut tag_ids: Vec<String> = ranked.into_iter().map(|(id, _)| id.to_string()).collect();
        let union_size = tag_ids.len();

        // top up by prototype similarity, then label similarity, then catalog order
        let target = cfg.min_size.min(catalog.len());
        if tag_ids.len() < target {
            let mut present: BTreeSet<String> = tag_ids.iter().cloned().collect();
            let fill = proto
                .iter()
                .map(|(id, _)| *id)
                .chain(label.iter().map(|(id, _)| *id))
                .chain(catalog.iter().map(|t| t.tag_id.as_str()));
            for id in fill {
                if tag_ids.len() >= target {
                    break;
                }
                if present.insert(id.to_string()) {
                    tag_ids.push(id.to_string());
                }
            }
        }

        debug!(
            document_id = %document.document_id,
            keyword_hits = keyword_hits.len(),
            union = union_size,
            size = tag_ids.len(),
            hard,
            "Built shortlist"
        );

        Shortlist {
            tag_ids,
            keyword_hits,
            hard,
        }
    }
}

fn by_score_then_id(a: &(&str, f32), b: &(&str, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(b.0))
}

/// Strip Hebrew points and cantillation, drop quote marks, lowercase.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !('\u{0591}'..='\u{05C7}').contains(c))
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '´' | '״' | '׳' | '“' | '”' | '‘' | '’'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Tags whose name or any synonym occurs in the document title or
/// description.
pub fn keyword_hits(document: &Document, catalog: &TagCatalog) -> BTreeSet<String> {
    let text = normalize_text(&format!("{} {}", document.title, document.description));
    catalog
        .iter()
        .filter(|tag| {
            std::iter::once(tag.name.as_str())
                .chain(tag.synonyms.iter().map(String::as_str))
                .map(|term| normalize_text(term.trim()))
                .any(|term| !term.is_empty() && text.contains(&term))
        })
        .map(|tag| tag.tag_id.clone())
        .collect()
}
