//! Retraining: embed labelled examples, build and calibrate prototypes,
//! publish the result.
//!
//! Only one retrain runs at a time. A failed retrain publishes nothing, so
//! the previously active set keeps serving.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lectag_config::{EmbeddingConfig, PrototypeConfig};
use lectag_core::error::{ProviderError, TrainingError};
use lectag_core::{EmbeddedExample, EmbeddingProvider, EmbeddingVector, PrototypeSet, TagCatalog, TrainingExample};
use lectag_prototypes::{PrototypeStore, build_prototypes};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

#[cfg(feature = "sqlite")]
use lectag_prototypes::PrototypeArchive;

/// Lifecycle of a background retrain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainingStatus {
    Pending,
    Running,
    Done { version: u64 },
    Failed { reason: String },
}

impl TrainingStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TrainingStatus::Done { .. } | TrainingStatus::Failed { .. })
    }
}

/// Handle to a retrain started with [`Trainer::spawn`].
#[derive(Debug, Clone)]
pub struct TrainingHandle {
    pub id: String,
    status: watch::Receiver<TrainingStatus>,
}

impl TrainingHandle {
    pub fn status(&self) -> TrainingStatus {
        self.status.borrow().clone()
    }

    /// Wait until the retrain finishes.
    pub async fn wait(&mut self) -> TrainingStatus {
        loop {
            let current = self.status.borrow_and_update().clone();
            if current.is_finished() {
                return current;
            }
            if self.status.changed().await.is_err() {
                // sender dropped without a final status: the task died
                let last = self.status.borrow().clone();
                return if last.is_finished() {
                    last
                } else {
                    TrainingStatus::Failed {
                        reason: "training task aborted".into(),
                    }
                };
            }
        }
    }
}

pub struct Trainer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<PrototypeStore>,
    #[cfg(feature = "sqlite")]
    archive: Option<Arc<PrototypeArchive>>,
    embedding: EmbeddingConfig,
    prototypes: PrototypeConfig,
    guard: Mutex<()>,
}

impl Trainer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<PrototypeStore>,
        embedding: EmbeddingConfig,
        prototypes: PrototypeConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            #[cfg(feature = "sqlite")]
            archive: None,
            embedding,
            prototypes,
            guard: Mutex::new(()),
        }
    }

    /// Persist every published set to `archive` as well.
    #[cfg(feature = "sqlite")]
    pub fn with_archive(mut self, archive: Arc<PrototypeArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn store(&self) -> &Arc<PrototypeStore> {
        &self.store
    }

    /// Retrain from labelled examples and publish the new set.
    ///
    /// Thresholds are calibrated on `holdout` when given, otherwise on the
    /// trailing share of `examples`.
    pub async fn train(
        &self,
        examples: &[TrainingExample],
        catalog: &TagCatalog,
        holdout: Option<&[TrainingExample]>,
    ) -> Result<Arc<PrototypeSet>, TrainingError> {
        let Ok(_running) = self.guard.try_lock() else {
            return Err(TrainingError::AlreadyRunning);
        };
        if examples.is_empty() {
            return Err(TrainingError::NoExamples);
        }

        info!(
            examples = examples.len(),
            holdout = holdout.map(<[_]>::len),
            tags = catalog.len(),
            embedder = self.embedder.name(),
            "Retraining prototypes"
        );

        let mut texts = TextTable::default();
        for example in examples.iter().chain(holdout.unwrap_or_default()) {
            texts.add(&example.document_id, &example.text);
        }
        let labels: Vec<(String, String)> = catalog
            .iter()
            .map(|tag| (tag.tag_id.clone(), tag.label_text()))
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();
        for (tag_id, text) in &labels {
            texts.add(&format!("label:{tag_id}"), text);
        }

        let vectors = self.embed_all(&texts).await?;
        if let Some(expected) = self.embedding.dimensions
            && let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected)
        {
            return Err(TrainingError::DimensionMismatch {
                document_id: texts.ids[i].clone(),
                expected,
                found: v.len(),
            });
        }

        let embed = |list: &[TrainingExample]| -> Vec<EmbeddedExample> {
            list.iter()
                .map(|e| EmbeddedExample {
                    document_id: e.document_id.clone(),
                    embedding: vectors[texts.index[&e.text]].clone(),
                    tag_ids: e.assigned_tag_ids.clone(),
                })
                .collect()
        };
        let train_set = embed(examples);
        let holdout_set = holdout.map(embed);
        let label_embeddings: BTreeMap<String, EmbeddingVector> = labels
            .iter()
            .map(|(tag_id, text)| (tag_id.clone(), vectors[texts.index[text]].clone()))
            .collect();

        let set = build_prototypes(
            &train_set,
            catalog,
            label_embeddings,
            holdout_set.as_deref(),
            &self.prototypes,
        )?;

        let published = self.publish(set).await?;
        info!(
            version = published.version,
            prototypes = published.len(),
            low_data = published.low_data_count(),
            uncalibrated = published.uncalibrated_count(),
            "Retrain complete"
        );
        Ok(published)
    }

    #[cfg(feature = "sqlite")]
    async fn publish(&self, set: PrototypeSet) -> Result<Arc<PrototypeSet>, TrainingError> {
        let Some(archive) = &self.archive else {
            return Ok(self.store.publish(set));
        };
        // another process may have archived newer versions than this store knows
        let version = self.store.next_version().max(archive.latest_version().await? + 1);
        // persist first so a failed write leaves the active set untouched
        let set = set.with_version(version);
        archive.save(&set).await?;
        Ok(self.store.restore(set))
    }

    #[cfg(not(feature = "sqlite"))]
    async fn publish(&self, set: PrototypeSet) -> Result<Arc<PrototypeSet>, TrainingError> {
        Ok(self.store.publish(set))
    }

    async fn embed_all(&self, texts: &TextTable) -> Result<Vec<EmbeddingVector>, TrainingError> {
        let batch_size = self.embedding.batch_size.max(1);
        let timeout = self.embedding.timeout();
        let mut vectors = Vec::with_capacity(texts.texts.len());

        for (chunk_no, (chunk, ids)) in texts
            .texts
            .chunks(batch_size)
            .zip(texts.ids.chunks(batch_size))
            .enumerate()
        {
            let text_id = ids.first().cloned().unwrap_or_default();
            let batch = match tokio::time::timeout(timeout, self.embedder.embed_batch(chunk)).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(source)) => {
                    warn!(text_id = %text_id, error = %source, "Embedding batch failed");
                    return Err(TrainingError::Embedding { text_id, source });
                }
                Err(_) => {
                    warn!(text_id = %text_id, timeout_secs = timeout.as_secs(), "Embedding batch timed out");
                    return Err(TrainingError::Embedding {
                        text_id,
                        source: ProviderError::Timeout(format!(
                            "embedding batch timed out after {}s",
                            timeout.as_secs()
                        )),
                    });
                }
            };
            if batch.len() != chunk.len() {
                return Err(TrainingError::Embedding {
                    text_id,
                    source: ProviderError::InvalidResponse(format!(
                        "expected {} vectors, got {}",
                        chunk.len(),
                        batch.len()
                    )),
                });
            }
            debug!(chunk = chunk_no, size = chunk.len(), "Embedded batch");
            vectors.extend(batch);
        }
        Ok(vectors)
    }

    /// Run [`Trainer::train`] in the background.
    pub fn spawn(
        self: &Arc<Self>,
        examples: Vec<TrainingExample>,
        catalog: TagCatalog,
        holdout: Option<Vec<TrainingExample>>,
    ) -> TrainingHandle {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(TrainingStatus::Pending);
        let trainer = Arc::clone(self);
        let job_id = id.clone();

        tokio::spawn(async move {
            tx.send_replace(TrainingStatus::Running);
            let status = match trainer.train(&examples, &catalog, holdout.as_deref()).await {
                Ok(set) => TrainingStatus::Done { version: set.version },
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Background retrain failed");
                    TrainingStatus::Failed { reason: e.to_string() }
                }
            };
            tx.send_replace(status);
        });

        TrainingHandle { id, status: rx }
    }
}

/// Distinct texts to embed, in first-seen order.
#[derive(Default)]
struct TextTable {
    texts: Vec<String>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
}

impl TextTable {
    fn add(&mut self, id: &str, text: &str) {
        if self.index.contains_key(text) {
            return;
        }
        self.index.insert(text.to_string(), self.texts.len());
        self.texts.push(text.to_string());
        self.ids.push(id.to_string());
    }
}
