// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Read, deserialize and validate a config file.
///
/// Checks performed on top of deserialization:
/// - the runner program is set,
/// - debounce and cancel timeouts are non-zero,
/// - every watch/exclude glob compiles,
/// - launch configuration names are usable on the command line.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// `Testrelay.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Testrelay.toml")
}
