// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::ServerMode;

/// Command-line arguments for `testrelay`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "testrelay",
    version,
    about = "Run and debug tests while keeping source watchers in step with the analysis service.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Testrelay.toml")]
    pub config: String,

    /// Test ids to run at startup, e.g. `com.acme.FooTest#adds`.
    #[arg(value_name = "TEST")]
    pub tests: Vec<String>,

    /// Run the startup tests under the debugger.
    #[arg(long)]
    pub debug: bool,

    /// Named launch configuration (`[launch.<name>]`) for the startup tests.
    #[arg(long, value_name = "NAME")]
    pub launch: Option<String>,

    /// Run the startup tests once, then shut down. No stdin host, no watching.
    #[arg(long, requires = "tests")]
    pub once: bool,

    /// Override the initial server mode from the config.
    #[arg(long, value_enum, value_name = "MODE")]
    pub mode: Option<CliServerMode>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TESTRELAY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the config, print it, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum CliServerMode {
    Light,
    Standard,
    Hybrid,
}

impl From<CliServerMode> for ServerMode {
    fn from(mode: CliServerMode) -> Self {
        match mode {
            CliServerMode::Light => ServerMode::LightWeight,
            CliServerMode::Standard => ServerMode::Standard,
            CliServerMode::Hybrid => ServerMode::Hybrid,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
