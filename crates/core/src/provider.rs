//! Collaborator traits for the embedding model and the category reasoner.
//!
//! Both are external services. The engine only depends on these contracts;
//! network implementations live outside this workspace.

use async_trait::async_trait;
use crate::error::ProviderError;
use crate::judgment::CategoryJudgment;
use crate::prototype::EmbeddingVector;
use crate::tag::{Category, Document, Tag};

/// Maps text to a fixed-dimension vector.
///
/// Must be safe to retry: the same text and model yield the same vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g., "openai", "mock")
    fn name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<EmbeddingVector, ProviderError>;

    /// Embed several texts, preserving order.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Produces structured judgments for one category of one document.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Provider name (e.g., "openai", "mock")
    fn name(&self) -> &str;

    /// Judge which shortlisted tags of `category` apply to `document`.
    ///
    /// `shortlist` holds only tags of the requested category.
    async fn reason_category(
        &self,
        category: Category,
        document: &Document,
        shortlist: &[Tag],
    ) -> std::result::Result<Vec<CategoryJudgment>, ProviderError> {
        let _ = (category, document, shortlist);
        Err(ProviderError::NotConfigured(format!(
            "{} does not support category reasoning",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        fn name(&self) -> &str {
            "length"
        }

        async fn embed(&self, text: &str) -> std::result::Result<EmbeddingVector, ProviderError> {
            Ok(vec![text.chars().count() as f32, 1.0])
        }
    }

    struct Unconfigured;

    #[async_trait]
    impl ReasoningProvider for Unconfigured {
        fn name(&self) -> &str {
            "unconfigured"
        }
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let texts = vec!["abc".to_string(), "a".to_string()];
        let vectors = LengthEmbedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![3.0, 1.0], vec![1.0, 1.0]]);
    }

    #[tokio::test]
    async fn default_reasoning_is_not_configured() {
        let doc = Document::new("d", "t", "");
        let err = Unconfigured
            .reason_category(Category::Topic, &doc, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
