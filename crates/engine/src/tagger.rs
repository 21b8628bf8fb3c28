//! Per-document suggestion pipeline.
//!
//! embed → snapshot active set → score → shortlist → reasoning → combine.
//! Every document reads one snapshot of the active prototype set, so a
//! publish during a request never mixes versions.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lectag_config::AppConfig;
use lectag_core::error::{ProviderError, SuggestError};
use lectag_core::{
    CategoryJudgments, Document, EmbeddingProvider, EmbeddingVector, PrototypeSet, ReasoningProvider,
    Suggestion, SuggestionSource, TagCatalog,
};
use lectag_prototypes::{PrototypeStore, SimilarityRanking, score, score_labels};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::combiner::EnsembleCombiner;
use crate::reasoning::ReasoningFanOut;
use crate::shortlist::{LecturerHistory, ShortlistSelector};

/// The result for one document of a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub result: Result<Vec<Suggestion>, SuggestError>,
}

/// Serializable view of a [`DocumentOutcome`].
#[derive(Debug, Serialize)]
pub struct OutcomeReport<'a> {
    pub document_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<&'a [Suggestion]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn report(&self) -> OutcomeReport<'_> {
        match &self.result {
            Ok(suggestions) => OutcomeReport {
                document_id: &self.document_id,
                suggestions: Some(suggestions),
                error: None,
            },
            Err(e) => OutcomeReport {
                document_id: &self.document_id,
                suggestions: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct Tagger {
    embedder: Arc<dyn EmbeddingProvider>,
    reasoning: Option<ReasoningFanOut>,
    store: Arc<PrototypeStore>,
    catalog: TagCatalog,
    history: LecturerHistory,
    selector: ShortlistSelector,
    combiner: EnsembleCombiner,
    embed_timeout: Duration,
    batch_concurrency: usize,
    config: AppConfig,
}

impl Tagger {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<PrototypeStore>,
        catalog: TagCatalog,
        config: &AppConfig,
    ) -> Self {
        Self {
            embedder,
            reasoning: None,
            store,
            catalog,
            history: LecturerHistory::default(),
            selector: ShortlistSelector::new(config.shortlist.clone()),
            combiner: EnsembleCombiner::new(config.ensemble.clone()),
            embed_timeout: config.embedding.timeout(),
            batch_concurrency: config.batch.concurrency.max(1),
            config: config.clone(),
        }
    }

    /// Attach the category reasoner. Ignored when reasoning is disabled in
    /// the configuration.
    pub fn with_reasoner(mut self, provider: Arc<dyn ReasoningProvider>) -> Self {
        if self.config.reasoning.enabled {
            self.reasoning = Some(ReasoningFanOut::new(provider, &self.config.reasoning));
        } else {
            info!(provider = provider.name(), "Reasoning disabled, using prototype-only mode");
        }
        self
    }

    pub fn with_history(mut self, history: LecturerHistory) -> Self {
        self.history = history;
        self
    }

    pub fn catalog(&self) -> &TagCatalog {
        &self.catalog
    }

    /// Full ensemble suggestions for one document.
    ///
    /// Without a reasoner this is the same as [`Tagger::suggest_fast`].
    pub async fn suggest(&self, document: &Document) -> Result<Vec<Suggestion>, SuggestError> {
        let set = self.snapshot()?;
        let embedding = self.embed(document).await?;
        let ranking = self.rank(document, &embedding, &set)?;

        let Some(reasoning) = &self.reasoning else {
            return Ok(self.prototype_only(document, &ranking));
        };

        let labels = score_labels(&embedding, &set);
        let shortlist = self
            .selector
            .select(document, &self.catalog, &ranking, &labels, Some(&self.history));
        let judgments: CategoryJudgments = reasoning.run(document, &shortlist, &self.catalog).await;
        let suggestions = self.combiner.combine(&document.document_id, &judgments, &ranking);

        debug!(
            document_id = %document.document_id,
            version = set.version,
            shortlist = shortlist.len(),
            suggestions = suggestions.len(),
            "Suggested tags"
        );
        Ok(suggestions)
    }

    /// Prototype-only suggestions: tags clearing their own threshold, best
    /// first, capped at `top_k`.
    pub async fn suggest_fast(&self, document: &Document) -> Result<Vec<Suggestion>, SuggestError> {
        let set = self.snapshot()?;
        let embedding = self.embed(document).await?;
        let ranking = self.rank(document, &embedding, &set)?;
        Ok(self.prototype_only(document, &ranking))
    }

    /// Suggest for many documents with bounded concurrency.
    ///
    /// Outcomes come back in input order; one document's failure does not
    /// affect the others.
    pub async fn suggest_batch(&self, documents: &[Document]) -> Vec<DocumentOutcome> {
        let outcomes: Vec<DocumentOutcome> = futures::stream::iter(documents)
            .map(|document| async move {
                DocumentOutcome {
                    document_id: document.document_id.clone(),
                    result: self.suggest(document).await,
                }
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(documents = documents.len(), failed, "Batch suggestion complete");
        outcomes
    }

    fn snapshot(&self) -> Result<Arc<PrototypeSet>, SuggestError> {
        self.store.active().ok_or(SuggestError::NoActiveSet)
    }

    async fn embed(&self, document: &Document) -> Result<EmbeddingVector, SuggestError> {
        let text = document.text();
        let source = match tokio::time::timeout(self.embed_timeout, self.embedder.embed(&text)).await {
            Ok(Ok(embedding)) => return Ok(embedding),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout(format!(
                "document embedding timed out after {}s",
                self.embed_timeout.as_secs()
            )),
        };
        warn!(document_id = %document.document_id, error = %source, "Document embedding failed");
        Err(SuggestError::Embedding {
            document_id: document.document_id.clone(),
            source,
        })
    }

    /// Score against `set`, refusing embeddings whose length differs from
    /// the configured dimension or the set's own.
    fn rank(
        &self,
        document: &Document,
        embedding: &[f32],
        set: &PrototypeSet,
    ) -> Result<SimilarityRanking, SuggestError> {
        for expected in [self.config.embedding.dimensions, set.dimension()].into_iter().flatten() {
            if expected != embedding.len() {
                warn!(
                    document_id = %document.document_id,
                    expected,
                    found = embedding.len(),
                    "Document embedding has the wrong dimension"
                );
                return Err(SuggestError::DimensionMismatch {
                    document_id: document.document_id.clone(),
                    expected,
                    found: embedding.len(),
                });
            }
        }
        Ok(score(embedding, set))
    }

    fn prototype_only(&self, document: &Document, ranking: &SimilarityRanking) -> Vec<Suggestion> {
        ranking
            .above_threshold()
            .take(self.config.ensemble.top_k)
            .map(|entry| Suggestion {
                document_id: document.document_id.clone(),
                tag_id: entry.tag_id.clone(),
                combined_score: entry.similarity.clamp(0.0, 1.0),
                reasoning_score: None,
                prototype_score: Some(entry.similarity),
                threshold: entry.threshold,
                agreement_bonus_applied: false,
                source: SuggestionSource::PrototypeOnly,
                rationale: None,
            })
            .collect()
    }
}
