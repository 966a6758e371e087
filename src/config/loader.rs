// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{BotConfig, RawBotConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawBotConfig`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// parsed durations and sanity checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawBotConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawBotConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<BotConfig> {
    let raw_config = load_from_path(&path)?;
    let config = BotConfig::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<BotConfig> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(?path, "config file not found; using defaults");
        return BotConfig::try_from(RawBotConfig::default());
    }
    load_and_validate(path)
}
