//! `lectag score`: rank a document embedding against the active set.

use std::path::Path;

use lectag_core::EmbeddingVector;
use lectag_prototypes::score;
use serde::Deserialize;

use super::{CmdResult, load_config, open_archive, read_json};

#[derive(Debug, Deserialize)]
struct ScoreFile {
    #[serde(default)]
    document_id: Option<String>,
    embedding: EmbeddingVector,
}

pub async fn run(data: &Path, limit: usize) -> CmdResult {
    let config = load_config()?;
    let file: ScoreFile = read_json(data)?;

    let archive = open_archive(&config).await?;
    let Some(set) = archive.load_active().await? else {
        return Err("No active prototype set; run `lectag train` first".into());
    };
    for expected in [config.embedding.dimensions, set.dimension()].into_iter().flatten() {
        if expected != file.embedding.len() {
            return Err(format!(
                "Embedding has {} dimensions, expected {expected}",
                file.embedding.len()
            )
            .into());
        }
    }

    let ranking = score(&file.embedding, &set);
    println!(
        "🏷️  {} against version {}",
        file.document_id.as_deref().unwrap_or("document"),
        ranking.version
    );
    println!();
    for (i, entry) in ranking.top(limit).iter().enumerate() {
        let marker = if entry.clears_threshold() { "✅" } else { "  " };
        println!(
            "  {:>2}. {marker} {:<24} similarity={:.3} threshold={:.3}",
            i + 1,
            entry.tag_id,
            entry.similarity,
            entry.threshold
        );
    }
    let above = ranking.above_threshold().count();
    println!();
    println!("   {above} of {} tags clear their threshold", ranking.len());
    Ok(())
}
