//! Tag reference data and the documents tags are assigned to.
//!
//! Tags are immutable within one training run. Every tag belongs to exactly
//! one of five fixed categories, and the reasoning step is issued once per
//! category.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// The five fixed tag categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(alias = "topic")]
    Topic,
    #[serde(alias = "persona")]
    Persona,
    #[serde(alias = "tone")]
    Tone,
    #[serde(alias = "format")]
    Format,
    #[serde(alias = "audience")]
    Audience,
}

impl Category {
    /// Every category, in fan-out order.
    pub const ALL: [Category; 5] = [
        Category::Topic,
        Category::Persona,
        Category::Tone,
        Category::Format,
        Category::Audience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Topic => "Topic",
            Category::Persona => "Persona",
            Category::Tone => "Tone",
            Category::Format => "Format",
            Category::Audience => "Audience",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// A suggestible tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: String,

    /// Display name (Hebrew in production data)
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,

    pub category: Category,
}

impl Tag {
    pub fn new(tag_id: impl Into<String>, name: impl Into<String>, category: Category) -> Self {
        Self {
            tag_id: tag_id.into(),
            name: name.into(),
            synonyms: Vec::new(),
            category,
        }
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms = synonyms.into_iter().map(Into::into).collect();
        self
    }

    /// The text embedded once per tag to produce its label embedding.
    pub fn label_text(&self) -> String {
        let mut text = self.name.clone();
        for synonym in self.synonyms.iter().filter(|s| !s.trim().is_empty()) {
            text.push(' ');
            text.push_str(synonym.trim());
        }
        text
    }
}

/// The full tag universe, ordered by tag id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Tag>", into = "Vec<Tag>")]
pub struct TagCatalog {
    tags: BTreeMap<String, Tag>,
}

impl TagCatalog {
    pub fn new(tags: impl IntoIterator<Item = Tag>) -> Self {
        tags.into_iter().collect()
    }

    pub fn get(&self, tag_id: &str) -> Option<&Tag> {
        self.tags.get(tag_id)
    }

    pub fn contains(&self, tag_id: &str) -> bool {
        self.tags.contains_key(tag_id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &Tag> {
        self.tags.values().filter(move |t| t.category == category)
    }

    /// Tag ids belonging to one category.
    pub fn ids_in(&self, category: Category) -> BTreeSet<String> {
        self.by_category(category).map(|t| t.tag_id.clone()).collect()
    }
}

impl FromIterator<Tag> for TagCatalog {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().map(|t| (t.tag_id.clone(), t)).collect(),
        }
    }
}

impl From<Vec<Tag>> for TagCatalog {
    fn from(tags: Vec<Tag>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<TagCatalog> for Vec<Tag> {
    fn from(catalog: TagCatalog) -> Self {
        catalog.tags.into_values().collect()
    }
}

/// A document (lecture) to be tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecturer: Option<String>,
}

impl Document {
    pub fn new(
        document_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
            description: description.into(),
            lecturer: None,
        }
    }

    pub fn with_lecturer(mut self, lecturer: impl Into<String>) -> Self {
        self.lecturer = Some(lecturer.into());
        self
    }

    /// Canonical embedding input: labelled title and description lines.
    pub fn text(&self) -> String {
        format!("[כותרת] {}\n[תיאור] {}", self.title, self.description)
    }
}

/// A labelled document used for training. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub document_id: String,

    pub text: String,

    #[serde(default)]
    pub assigned_tag_ids: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecturer: Option<String>,
}

impl TrainingExample {
    pub fn from_document<I, S>(document: &Document, tag_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_id: document.document_id.clone(),
            text: document.text(),
            assigned_tag_ids: tag_ids.into_iter().map(Into::into).collect(),
            lecturer: document.lecturer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("topic".parse::<Category>().unwrap(), Category::Topic);
        assert_eq!(" AUDIENCE ".parse::<Category>().unwrap(), Category::Audience);
        assert!("genre".parse::<Category>().is_err());
    }

    #[test]
    fn category_deserializes_lowercase_alias() {
        let cat: Category = serde_json::from_str("\"tone\"").unwrap();
        assert_eq!(cat, Category::Tone);
        let cat: Category = serde_json::from_str("\"Format\"").unwrap();
        assert_eq!(cat, Category::Format);
    }

    #[test]
    fn label_text_joins_name_and_synonyms() {
        let tag = Tag::new("t1", "היסטוריה", Category::Topic)
            .with_synonyms(["עבר", " ", "מורשת "]);
        assert_eq!(tag.label_text(), "היסטוריה עבר מורשת");
    }

    #[test]
    fn catalog_groups_by_category() {
        let catalog = TagCatalog::new([
            Tag::new("b", "B", Category::Tone),
            Tag::new("a", "A", Category::Topic),
            Tag::new("c", "C", Category::Topic),
        ]);
        let topics: Vec<_> = catalog.by_category(Category::Topic).map(|t| t.tag_id.as_str()).collect();
        assert_eq!(topics, vec!["a", "c"]);
        assert_eq!(catalog.ids_in(Category::Tone).len(), 1);
        assert!(catalog.ids_in(Category::Format).is_empty());
    }

    #[test]
    fn catalog_roundtrips_as_list() {
        let catalog = TagCatalog::new([Tag::new("x", "X", Category::Persona)]);
        let json = serde_json::to_string(&catalog).unwrap();
        assert!(json.starts_with('['));
        let back: TagCatalog = serde_json::from_str(&json).unwrap();
        assert!(back.contains("x"));
    }

    #[test]
    fn document_text_has_labelled_lines() {
        let doc = Document::new("d1", "Title", "Body");
        assert_eq!(doc.text(), "[כותרת] Title\n[תיאור] Body");
    }
}
