pub mod config_cmd;
pub mod score;
pub mod train;
pub mod versions;

use std::path::Path;

use lectag_config::AppConfig;
use lectag_prototypes::PrototypeArchive;
use serde::de::DeserializeOwned;

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn load_config() -> CmdResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub async fn open_archive(config: &AppConfig) -> CmdResult<PrototypeArchive> {
    if !config.archive.enabled {
        return Err("The prototype archive is disabled ([archive] enabled = false)".into());
    }
    let archive = PrototypeArchive::open(&config.archive.path)
        .await
        .map_err(|e| format!("Failed to open archive {}: {e}", config.archive.path.display()))?;
    Ok(archive)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> CmdResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let value = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid JSON in {}: {e}", path.display()))?;
    Ok(value)
}
