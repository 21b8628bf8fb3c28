//! Scripted collaborators for engine tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lectag_core::error::ProviderError;
use lectag_core::{Category, CategoryJudgment, Document, EmbeddingProvider, EmbeddingVector, ReasoningProvider, Tag};

/// Looks texts up in a table, falling back to a default vector.
pub struct MockEmbedder {
    table: BTreeMap<String, EmbeddingVector>,
    default: EmbeddingVector,
    fail_on: Option<String>,
    delay: Option<Duration>,
    embedded: Mutex<Vec<String>>,
    batches: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(default: EmbeddingVector) -> Self {
        Self {
            table: BTreeMap::new(),
            default,
            fail_on: None,
            delay: None,
            embedded: Mutex::new(Vec::new()),
            batches: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, text: &str, vector: EmbeddingVector) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }

    /// Fail any text containing `needle`.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn embedded(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn lookup(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        if let Some(needle) = &self.fail_on
            && text.contains(needle.as_str())
        {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("cannot embed '{needle}'"),
            });
        }
        self.embedded.lock().unwrap().push(text.to_string());
        Ok(self.table.get(text).cloned().unwrap_or_else(|| self.default.clone()))
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lookup(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, ProviderError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        texts.iter().map(|t| self.lookup(t)).collect()
    }
}

/// Returns fixed judgments per category and records what it was shown.
#[derive(Default)]
pub struct ScriptedReasoner {
    script: BTreeMap<Category, Vec<CategoryJudgment>>,
    seen: Mutex<BTreeMap<Category, Vec<String>>>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: Category, judgments: Vec<CategoryJudgment>) -> Self {
        self.script.insert(category, judgments);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tag ids offered for `category` on the last call.
    pub fn seen(&self, category: Category) -> Vec<String> {
        self.seen.lock().unwrap().get(&category).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn reason_category(
        &self,
        category: Category,
        _document: &Document,
        shortlist: &[Tag],
    ) -> Result<Vec<CategoryJudgment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .insert(category, shortlist.iter().map(|t| t.tag_id.clone()).collect());
        Ok(self.script.get(&category).cloned().unwrap_or_default())
    }
}

pub struct FailingReasoner;

#[async_trait::async_trait]
impl ReasoningProvider for FailingReasoner {
    fn name(&self) -> &str {
        "failing"
    }

    async fn reason_category(
        &self,
        _category: Category,
        _document: &Document,
        _shortlist: &[Tag],
    ) -> Result<Vec<CategoryJudgment>, ProviderError> {
        Err(ProviderError::RateLimited { retry_after_secs: 10 })
    }
}

pub struct PanickingReasoner;

#[async_trait::async_trait]
impl ReasoningProvider for PanickingReasoner {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn reason_category(
        &self,
        category: Category,
        _document: &Document,
        _shortlist: &[Tag],
    ) -> Result<Vec<CategoryJudgment>, ProviderError> {
        panic!("reasoner exploded on {category}");
    }
}

/// Sleeps on one category, answers the rest from a script.
pub struct SleepingReasoner {
    slow: Category,
    delay: Duration,
    inner: ScriptedReasoner,
}

impl SleepingReasoner {
    pub fn new(slow: Category, delay: Duration) -> Self {
        Self {
            slow,
            delay,
            inner: ScriptedReasoner::new(),
        }
    }

    pub fn with(mut self, category: Category, judgments: Vec<CategoryJudgment>) -> Self {
        self.inner = self.inner.with(category, judgments);
        self
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for SleepingReasoner {
    fn name(&self) -> &str {
        "sleeping"
    }

    async fn reason_category(
        &self,
        category: Category,
        document: &Document,
        shortlist: &[Tag],
    ) -> Result<Vec<CategoryJudgment>, ProviderError> {
        if category == self.slow {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.reason_category(category, document, shortlist).await
    }
}
