// src/config/mod.rs

//! Configuration loading and validation for testrelay.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: turning a raw model into a checked [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, LaunchSection, RawConfigFile, RunnerSection, SchedulerSection, ServiceSection,
    WatchSection, DEFAULT_CANCEL_TIMEOUT_MS, DEFAULT_DEBOUNCE_MS,
};
