use anyhow::{Context, Result};
use std::path::PathBuf;

/// Settings file read when no `--config` is given: ~/.config/lanproxy/config.json
pub fn user_config_file() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .context("Could not locate a home directory for lanproxy settings; pass --config instead")?;
    Ok(home.join(".config").join("lanproxy").join("config.json"))
}
