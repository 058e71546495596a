// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::run::LaunchConfiguration;
use crate::server::Capability;
use crate::types::{BusyBehaviour, ServerMode};

/// Default trailing-debounce window for watcher re-registration.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default bound on waiting for a backend to confirm teardown.
pub const DEFAULT_CANCEL_TIMEOUT_MS: u64 = 5_000;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [scheduler]
/// busy_behaviour = "queue"
///
/// [watch]
/// patterns = ["src/test/**/*.java"]
///
/// [runner]
/// program = "java"
/// args = ["-jar", "runner.jar"]
///
/// [launch.ci]
/// env = { CI = "1" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub service: ServiceSection,

    pub runner: RunnerSection,

    /// Named launch configurations from `[launch.<name>]`.
    #[serde(default)]
    pub launch: BTreeMap<String, LaunchSection>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub watch: WatchSection,
    pub service: ServiceSection,
    pub runner: RunnerSection,
    pub launch: BTreeMap<String, LaunchSection>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            scheduler: raw.scheduler,
            watch: raw.watch,
            service: raw.service,
            runner: raw.runner,
            launch: raw.launch,
        }
    }

    /// Every `[launch.<name>]` section, resolved.
    pub fn launch_configurations(&self) -> BTreeMap<String, LaunchConfiguration> {
        self.launch
            .keys()
            .filter_map(|name| Some((name.clone(), self.launch_configuration(name)?)))
            .collect()
    }

    /// Resolve `[launch.<name>]` into the configuration forwarded to the backend.
    pub fn launch_configuration(&self, name: &str) -> Option<LaunchConfiguration> {
        self.launch.get(name).map(|section| LaunchConfiguration {
            name: name.to_string(),
            args: section.args.clone(),
            env: section.env.clone(),
        })
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default)]
    pub busy_behaviour: BusyBehaviour,

    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,
}

impl SchedulerSection {
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            busy_behaviour: BusyBehaviour::default(),
            cancel_timeout_ms: DEFAULT_CANCEL_TIMEOUT_MS,
        }
    }
}

fn default_cancel_timeout_ms() -> u64 {
    DEFAULT_CANCEL_TIMEOUT_MS
}

/// `[watch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Directories watched recursively, relative to the config file.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Globs for test sources while the service is standard-ready.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Globs used in LightWeight and Hybrid mode. Empty means "watch nothing".
    #[serde(default)]
    pub light_weight_patterns: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,
}

impl WatchSection {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            roots: default_roots(),
            patterns: Vec::new(),
            light_weight_patterns: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

/// `[service]` section: what the analysis service reports and supports.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    #[serde(default)]
    pub initial_mode: ServerMode,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            initial_mode: ServerMode::Unknown,
            capabilities: default_capabilities(),
        }
    }
}

fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability::Classpath,
        Capability::ServerMode,
        Capability::ProjectImport,
    ]
}

/// `[runner]` section: how the test-execution backend is started.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSection {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Pass targets through a temp file instead of the argument list.
    #[serde(default)]
    pub args_file: bool,

    /// Extra runner arguments in Debug mode.
    #[serde(default)]
    pub debug_args: Vec<String>,

    /// Debugger attach command spawned after the runner in Debug mode.
    #[serde(default)]
    pub attach: Vec<String>,
}

/// `[launch.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LaunchSection {
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
