//! `lectag versions`: list archived prototype versions.

use super::{CmdResult, load_config, open_archive};

pub async fn run() -> CmdResult {
    let config = load_config()?;
    let archive = open_archive(&config).await?;
    let versions = archive.list_versions().await?;

    println!("📦 Prototype versions ({})", config.archive.path.display());
    println!("==================");
    if versions.is_empty() {
        println!("   No versions archived yet.");
        return Ok(());
    }
    for v in versions {
        println!(
            "  {} v{:<4} {}  prototypes={:<4} low-data={}",
            if v.is_active { "*" } else { " " },
            v.version,
            v.created_at.format("%Y-%m-%d %H:%M:%S"),
            v.num_prototypes,
            v.num_low_data
        );
    }
    Ok(())
}
