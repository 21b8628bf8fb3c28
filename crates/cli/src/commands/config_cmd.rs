//! `lectag config`: show configuration.

use lectag_config::AppConfig;

use super::{CmdResult, load_config};

pub fn show(defaults: bool) -> CmdResult {
    if defaults {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = load_config()?;
    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("# loaded from {}", config_path.display());
    } else {
        println!("# no config file at {}, showing defaults", config_path.display());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
