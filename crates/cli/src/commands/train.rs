//! `lectag train`: build, calibrate and archive a prototype set.

use std::collections::BTreeMap;
use std::path::Path;

use lectag_core::{EmbeddedExample, EmbeddingVector, PrototypeSet, Tag, TagCatalog};
use lectag_prototypes::build_prototypes;
use serde::Deserialize;

use super::{CmdResult, load_config, open_archive, read_json};

#[derive(Debug, Deserialize)]
struct TrainingFile {
    tags: Vec<Tag>,
    examples: Vec<EmbeddedExample>,
    #[serde(default)]
    label_embeddings: BTreeMap<String, EmbeddingVector>,
    #[serde(default)]
    holdout: Option<Vec<EmbeddedExample>>,
}

pub async fn run(data: &Path, holdout_split: Option<f32>) -> CmdResult {
    let mut config = load_config()?;
    if let Some(split) = holdout_split {
        config.prototypes.train_holdout_split = split;
        config.validate()?;
    }

    let file: TrainingFile = read_json(data)?;
    let catalog = TagCatalog::new(file.tags);
    println!(
        "📚 Training on {} examples across {} tags",
        file.examples.len(),
        catalog.len()
    );

    let set = build_prototypes(
        &file.examples,
        &catalog,
        file.label_embeddings,
        file.holdout.as_deref(),
        &config.prototypes,
    )?;

    let set = if config.archive.enabled {
        let archive = open_archive(&config).await?;
        let version = archive.latest_version().await? + 1;
        let set = set.with_version(version);
        archive.save(&set).await?;
        println!("   ✅ Saved as version {version} in {}", config.archive.path.display());
        set
    } else {
        println!("   ⚠️  Archive disabled, nothing saved");
        set
    };

    print_summary(&set);
    Ok(())
}

fn print_summary(set: &PrototypeSet) {
    println!();
    println!("   Prototypes:   {}", set.len());
    println!("   Low-data:     {}", set.low_data_count());
    println!("   Uncalibrated: {}", set.uncalibrated_count());
    if let Some(dimension) = set.dimension() {
        println!("   Dimension:    {dimension}");
    }
    println!();
    for p in set.iter() {
        let flags = match (p.low_data, p.calibrated) {
            (true, false) => " [low-data, uncalibrated]",
            (true, true) => " [low-data]",
            (false, false) => " [uncalibrated]",
            (false, true) => "",
        };
        println!(
            "  {:<24} n={:<4} threshold={:.3}{flags}",
            p.tag_id, p.example_count, p.threshold
        );
    }
}
