//! Per-category reasoning fan-out.
//!
//! One call per category runs concurrently, bounded by a semaphore. Each
//! call has its own timeout; an error, timeout or panic leaves that category
//! with an empty judgment set instead of failing the document.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use lectag_config::ReasoningConfig;
use lectag_core::{Category, CategoryJudgment, CategoryJudgments, Document, ReasoningProvider, TagCatalog};
use regex_lite::Regex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::shortlist::Shortlist;

pub struct ReasoningFanOut {
    provider: Arc<dyn ReasoningProvider>,
    max_workers: usize,
    timeout: Duration,
}

impl ReasoningFanOut {
    pub fn new(provider: Arc<dyn ReasoningProvider>, config: &ReasoningConfig) -> Self {
        Self {
            provider,
            max_workers: config.max_workers.max(1),
            timeout: config.timeout(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Judge every category of `document` against its shortlisted tags.
    ///
    /// Categories with no shortlisted tags are not sent to the provider.
    pub async fn run(
        &self,
        document: &Document,
        shortlist: &Shortlist,
        catalog: &TagCatalog,
    ) -> CategoryJudgments {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let document = Arc::new(document.clone());
        let mut tasks = JoinSet::new();

        for category in Category::ALL {
            let tags = shortlist.tags_in(category, catalog);
            if tags.is_empty() {
                continue;
            }
            let provider = Arc::clone(&self.provider);
            let permits = Arc::clone(&permits);
            let document = Arc::clone(&document);
            let timeout = self.timeout;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (category, Vec::new());
                };
                let result =
                    tokio::time::timeout(timeout, provider.reason_category(category, &document, &tags)).await;
                let judgments = match result {
                    Ok(Ok(judgments)) => judgments,
                    Ok(Err(e)) => {
                        warn!(
                            document_id = %document.document_id,
                            category = %category,
                            error = %e,
                            "Category reasoning failed, treating as empty"
                        );
                        Vec::new()
                    }
                    Err(_) => {
                        warn!(
                            document_id = %document.document_id,
                            category = %category,
                            timeout_secs = timeout.as_secs_f32(),
                            "Category reasoning timed out, treating as empty"
                        );
                        Vec::new()
                    }
                };
                (category, judgments)
            });
        }

        let mut judgments = CategoryJudgments::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((category, raw)) => {
                    let allowed = catalog.ids_in(category);
                    let clean = sanitize(raw, &allowed);
                    debug!(
                        document_id = %document.document_id,
                        category = %category,
                        judged = clean.len(),
                        "Category reasoning finished"
                    );
                    judgments.insert(category, clean);
                }
                Err(e) => {
                    warn!(
                        document_id = %document.document_id,
                        error = %e,
                        "Category reasoning task aborted"
                    );
                }
            }
        }
        judgments
    }
}

/// Keep judgments for `allowed` tags only, first occurrence wins, with
/// confidence clamped into `[0, 1]`.
pub fn sanitize(judgments: Vec<CategoryJudgment>, allowed: &BTreeSet<String>) -> Vec<CategoryJudgment> {
    let mut seen = BTreeSet::new();
    judgments
        .into_iter()
        .filter(|j| allowed.contains(&j.tag_id))
        .filter(|j| j.confidence.is_finite())
        .filter(|j| seen.insert(j.tag_id.clone()))
        .map(|mut j| {
            j.confidence = j.confidence.clamp(0.0, 1.0);
            j
        })
        .collect()
}

/// Parse a reasoner's raw answer for one category.
///
/// Expects a JSON object with `chosen_ids`, `confidence` (id to number) and
/// `rationales` (id to text). Prose around the object is tolerated; the last
/// `{...}` block is tried when the whole text is not JSON. Anything
/// unparsable yields no judgments.
pub fn parse_category_output(raw: &str, allowed: &BTreeSet<String>) -> Vec<CategoryJudgment> {
    let Some(value) = parse_object(raw) else {
        debug!(len = raw.len(), "Unparsable category output");
        return Vec::new();
    };

    let Some(chosen) = value.get("chosen_ids").and_then(Value::as_array) else {
        return Vec::new();
    };
    let confidence = value.get("confidence").and_then(Value::as_object);
    let rationales = value.get("rationales").and_then(Value::as_object);

    let mut seen = BTreeSet::new();
    chosen
        .iter()
        .filter_map(id_of)
        .filter(|id| allowed.contains(id) && seen.insert(id.clone()))
        .map(|id| {
            let score = confidence
                .and_then(|c| c.get(&id))
                .and_then(number_of)
                .unwrap_or(0.0);
            let rationale = rationales
                .and_then(|r| r.get(&id))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            CategoryJudgment::new(id, (score as f32).clamp(0.0, 1.0), rationale)
        })
        .collect()
}

/// Outermost-looking `{...}` span, used when the reply wraps its JSON in prose.
static JSON_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").ok());

fn parse_object(raw: &str) -> Option<Value> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }
    let last = JSON_BLOCK.as_ref()?.find_iter(raw).last()?;
    match serde_json::from_str::<Value>(last.as_str()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingReasoner, PanickingReasoner, ScriptedReasoner, SleepingReasoner};
    use lectag_core::Tag;

    fn allowed(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn catalog() -> TagCatalog {
        TagCatalog::new([
            Tag::new("t1", "History", Category::Topic),
            Tag::new("t2", "Science", Category::Topic),
            Tag::new("p1", "Storyteller", Category::Persona),
            Tag::new("a1", "Teens", Category::Audience),
            Tag::new("f1", "Workshop", Category::Format),
        ])
    }

    fn shortlist() -> Shortlist {
        Shortlist {
            tag_ids: vec!["t1".into(), "t2".into(), "p1".into(), "a1".into(), "f1".into()],
            ..Shortlist::default()
        }
    }

    fn config(max_workers: usize, timeout_secs: u64) -> ReasoningConfig {
        ReasoningConfig {
            max_workers,
            timeout_secs,
            ..ReasoningConfig::default()
        }
    }

    #[test]
    fn parses_plain_json() {
        let raw = r#"{"chosen_ids": ["t1", "t2"], "confidence": {"t1": 0.9, "t2": 0.4}, "rationales": {"t1": "about history"}}"#;
        let judgments = parse_category_output(raw, &allowed(&["t1", "t2"]));
        assert_eq!(judgments.len(), 2);
        assert_eq!(judgments[0].tag_id, "t1");
        assert!((judgments[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(judgments[0].rationale, "about history");
        assert_eq!(judgments[1].rationale, "");
    }

    #[test]
    fn parses_last_block_inside_prose() {
        let raw = "Here is my answer:\n```json\n{\"chosen_ids\": [\"t2\"], \"confidence\": {\"t2\": \"0.7\"}}\n```\nDone.";
        let judgments = parse_category_output(raw, &allowed(&["t1", "t2"]));
        assert_eq!(judgments.len(), 1);
        assert_eq!(judgments[0].tag_id, "t2");
        assert!((judgments[0].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn block_pattern_is_shared_across_replies() {
        assert!(JSON_BLOCK.is_some());
        for id in ["t1", "t2", "t1"] {
            let raw = format!("answer: {{\"chosen_ids\": [\"{id}\"]}} thanks");
            let judgments = parse_category_output(&raw, &allowed(&["t1", "t2"]));
            assert_eq!(judgments[0].tag_id, id);
        }
    }

    #[test]
    fn filters_unknown_and_duplicate_ids() {
        let raw = r#"{"chosen_ids": ["t1", "zz", "t1", 7], "confidence": {"t1": 1.7, "7": 0.5}}"#;
        let judgments = parse_category_output(raw, &allowed(&["t1", "7"]));
        let ids: Vec<_> = judgments.iter().map(|j| j.tag_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "7"]);
        assert_eq!(judgments[0].confidence, 1.0);
    }

    #[test]
    fn missing_confidence_reads_as_zero() {
        let judgments = parse_category_output(r#"{"chosen_ids": ["t1"]}"#, &allowed(&["t1"]));
        assert_eq!(judgments[0].confidence, 0.0);
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_category_output("no json here", &allowed(&["t1"])).is_empty());
        assert!(parse_category_output("{not json}", &allowed(&["t1"])).is_empty());
        assert!(parse_category_output(r#"{"other": 1}"#, &allowed(&["t1"])).is_empty());
        assert!(parse_category_output("[1, 2]", &allowed(&["t1"])).is_empty());
    }

    #[test]
    fn sanitize_drops_foreign_and_clamps() {
        let raw = vec![
            CategoryJudgment::new("t1", 1.4, "a"),
            CategoryJudgment::new("p1", 0.9, "wrong category"),
            CategoryJudgment::new("t1", 0.2, "dup"),
            CategoryJudgment::new("t2", f32::NAN, "nan"),
        ];
        let clean = sanitize(raw, &allowed(&["t1", "t2"]));
        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].confidence, 1.0);
        assert_eq!(clean[0].rationale, "a");
    }

    #[tokio::test]
    async fn fans_out_one_call_per_category() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .with(Category::Topic, vec![CategoryJudgment::new("t1", 0.8, "x")])
                .with(Category::Persona, vec![CategoryJudgment::new("p1", 0.6, "y")]),
        );
        let fan_out = ReasoningFanOut::new(reasoner.clone(), &config(5, 5));
        let doc = Document::new("d1", "title", "desc");
        let judgments = fan_out.run(&doc, &shortlist(), &catalog()).await;

        assert_eq!(judgments.get(Category::Topic)[0].tag_id, "t1");
        assert_eq!(judgments.get(Category::Persona)[0].tag_id, "p1");
        assert!(judgments.get(Category::Tone).is_empty());
        // Tone has no shortlisted tags and is never called
        assert_eq!(reasoner.calls(), 4);
    }

    #[tokio::test]
    async fn shortlist_seen_by_provider_is_per_category() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let fan_out = ReasoningFanOut::new(reasoner.clone(), &config(2, 5));
        let doc = Document::new("d1", "title", "desc");
        fan_out.run(&doc, &shortlist(), &catalog()).await;

        let seen = reasoner.seen(Category::Topic);
        assert_eq!(seen, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[tokio::test]
    async fn failing_provider_degrades_to_empty() {
        let fan_out = ReasoningFanOut::new(Arc::new(FailingReasoner), &config(5, 5));
        let doc = Document::new("d1", "title", "desc");
        let judgments = fan_out.run(&doc, &shortlist(), &catalog()).await;
        assert!(judgments.is_empty());
    }

    #[tokio::test]
    async fn panicking_provider_degrades_to_empty() {
        let fan_out = ReasoningFanOut::new(Arc::new(PanickingReasoner), &config(5, 5));
        let doc = Document::new("d1", "title", "desc");
        let judgments = fan_out.run(&doc, &shortlist(), &catalog()).await;
        assert!(judgments.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_category_times_out_alone() {
        let reasoner = SleepingReasoner::new(Category::Topic, Duration::from_secs(60))
            .with(Category::Persona, vec![CategoryJudgment::new("p1", 0.7, "ok")]);
        let fan_out = ReasoningFanOut::new(Arc::new(reasoner), &config(5, 1));
        let doc = Document::new("d1", "title", "desc");
        let judgments = fan_out.run(&doc, &shortlist(), &catalog()).await;

        assert!(judgments.get(Category::Topic).is_empty());
        assert_eq!(judgments.get(Category::Persona).len(), 1);
    }

    #[tokio::test]
    async fn foreign_tags_from_provider_are_dropped() {
        let reasoner = ScriptedReasoner::new().with(
            Category::Topic,
            vec![
                CategoryJudgment::new("p1", 0.9, "persona tag"),
                CategoryJudgment::new("t2", 0.5, "ok"),
            ],
        );
        let fan_out = ReasoningFanOut::new(Arc::new(reasoner), &config(1, 5));
        let doc = Document::new("d1", "title", "desc");
        let judgments = fan_out.run(&doc, &shortlist(), &catalog()).await;
        let topic: Vec<_> = judgments.get(Category::Topic).iter().map(|j| j.tag_id.as_str()).collect();
        assert_eq!(topic, vec!["t2"]);
    }
}
