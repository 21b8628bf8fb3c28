//! Reasoning judgments consumed by the combiner and the suggestions it emits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::tag::Category;

/// One reasoning verdict for a tag, scoped to a category and a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryJudgment {
    pub tag_id: String,

    /// Confidence in [0, 1]
    pub confidence: f32,

    #[serde(default)]
    pub rationale: String,
}

impl CategoryJudgment {
    pub fn new(tag_id: impl Into<String>, confidence: f32, rationale: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            confidence,
            rationale: rationale.into(),
        }
    }
}

/// Judgments for all five categories of one document.
///
/// A category that is absent (failed, timed out, never asked) reads as an
/// empty set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryJudgments {
    by_category: BTreeMap<Category, Vec<CategoryJudgment>>,
}

impl CategoryJudgments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: Category, judgments: Vec<CategoryJudgment>) {
        self.by_category.insert(category, judgments);
    }

    pub fn with(mut self, category: Category, judgments: Vec<CategoryJudgment>) -> Self {
        self.insert(category, judgments);
        self
    }

    pub fn get(&self, category: Category) -> &[CategoryJudgment] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True when every category's judgment set is empty.
    pub fn is_empty(&self) -> bool {
        self.by_category.values().all(Vec::is_empty)
    }

    /// Total judgments across categories.
    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategoryJudgment)> {
        self.by_category
            .iter()
            .flat_map(|(category, judgments)| judgments.iter().map(move |j| (*category, j)))
    }
}

/// Where a suggestion's support came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionSource {
    #[serde(rename = "backfill")]
    Backfill,
    #[serde(rename = "reasoning+prototype")]
    ReasoningPrototype,
    #[serde(rename = "prototype-only")]
    PrototypeOnly,
    #[serde(rename = "reasoning-only")]
    ReasoningOnly,
}

impl SuggestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionSource::Backfill => "backfill",
            SuggestionSource::ReasoningPrototype => "reasoning+prototype",
            SuggestionSource::PrototypeOnly => "prototype-only",
            SuggestionSource::ReasoningOnly => "reasoning-only",
        }
    }
}

impl fmt::Display for SuggestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A final, ranked tag suggestion for one document. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub document_id: String,
    pub tag_id: String,
    pub combined_score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_score: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype_score: Option<f32>,

    pub threshold: f32,
    pub agreement_bonus_applied: bool,
    pub source: SuggestionSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}
