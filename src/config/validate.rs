// src/config/validate.rs

use globset::Glob;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TestRelayError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TestRelayError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_runner(cfg)?;
    validate_timing(cfg)?;
    validate_patterns(cfg)?;
    validate_launch_names(cfg)?;
    Ok(())
}

fn validate_runner(cfg: &RawConfigFile) -> Result<()> {
    if cfg.runner.program.trim().is_empty() {
        return Err(TestRelayError::ConfigError(
            "[runner].program must not be empty".to_string(),
        ));
    }
    if cfg.runner.attach.iter().any(|a| a.trim().is_empty()) {
        return Err(TestRelayError::ConfigError(
            "[runner].attach must not contain empty arguments".to_string(),
        ));
    }
    Ok(())
}

fn validate_timing(cfg: &RawConfigFile) -> Result<()> {
    if cfg.watch.debounce_ms == 0 {
        return Err(TestRelayError::ConfigError(
            "[watch].debounce_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.scheduler.cancel_timeout_ms == 0 {
        return Err(TestRelayError::ConfigError(
            "[scheduler].cancel_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_patterns(cfg: &RawConfigFile) -> Result<()> {
    let all = cfg
        .watch
        .patterns
        .iter()
        .chain(cfg.watch.light_weight_patterns.iter())
        .chain(cfg.watch.exclude.iter());

    for pattern in all {
        Glob::new(pattern).map_err(|e| {
            TestRelayError::ConfigError(format!("invalid glob pattern '{pattern}': {e}"))
        })?;
    }
    Ok(())
}

fn validate_launch_names(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.launch.keys() {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(TestRelayError::ConfigError(format!(
                "launch configuration name '{name}' must be non-empty and contain no whitespace"
            )));
        }
    }
    Ok(())
}
