//! Similarity scoring of one document embedding against a prototype set.

use serde::{Deserialize, Serialize};

use lectag_core::PrototypeSet;

use crate::vector::rank_by_similarity;

/// One tag's similarity to the scored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEntry {
    pub tag_id: String,
    pub similarity: f32,
    pub threshold: f32,
}

impl SimilarityEntry {
    pub fn clears_threshold(&self) -> bool {
        self.similarity >= self.threshold
    }
}

/// Every prototyped tag, ordered by similarity descending then tag id
/// ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRanking {
    /// Version of the prototype set that produced the ranking
    pub version: u64,
    entries: Vec<SimilarityEntry>,
}

impl SimilarityRanking {
    /// Build a ranking from arbitrary entries, imposing the canonical order.
    pub fn from_entries(version: u64, mut entries: Vec<SimilarityEntry>) -> Self {
        entries.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tag_id.cmp(&b.tag_id))
        });
        Self { version, entries }
    }

    pub fn entries(&self) -> &[SimilarityEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimilarityEntry> {
        self.entries.iter()
    }

    pub fn get(&self, tag_id: &str) -> Option<&SimilarityEntry> {
        self.entries.iter().find(|e| e.tag_id == tag_id)
    }

    /// Entries whose similarity reaches their own threshold, in rank order.
    pub fn above_threshold(&self) -> impl Iterator<Item = &SimilarityEntry> {
        self.entries.iter().filter(|e| e.clears_threshold())
    }

    pub fn top(&self, n: usize) -> &[SimilarityEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn max_similarity(&self) -> Option<f32> {
        self.entries.first().map(|e| e.similarity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Score a document embedding against every prototype in `set`.
pub fn score(document_embedding: &[f32], set: &PrototypeSet) -> SimilarityRanking {
    let ranked = rank_by_similarity(
        document_embedding,
        set.iter().map(|p| (p.tag_id.as_str(), p.centroid.as_slice())),
    );
    let entries = ranked
        .into_iter()
        .filter_map(|(tag_id, similarity)| {
            let threshold = set.get(&tag_id)?.threshold;
            Some(SimilarityEntry {
                tag_id,
                similarity,
                threshold,
            })
        })
        .collect();
    SimilarityRanking {
        version: set.version,
        entries,
    }
}

/// Rank a document against the set's label embeddings.
pub fn score_labels(document_embedding: &[f32], set: &PrototypeSet) -> Vec<(String, f32)> {
    rank_by_similarity(
        document_embedding,
        set.label_embeddings
            .iter()
            .map(|(tag_id, v)| (tag_id.as_str(), v.as_slice())),
    )
}
