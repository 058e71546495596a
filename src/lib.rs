// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod host;
pub mod logging;
pub mod present;
pub mod run;
pub mod server;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Runtime, RuntimeComponents, RuntimeEvent, RuntimeOptions, UserCommand};
use crate::exec::ProcessBackend;
use crate::host::LineService;
use crate::present::{LogPresenter, ReportOpener, TextReport};
use crate::run::{ResultStore, RunnerScheduler, SchedulerOptions, TestItem};
use crate::server::{AnalysisService, ServerModeTracker, ServiceListener, wire_capabilities};
use crate::types::RunMode;
use crate::watch::{DebouncedWatcherRegistry, ModePatterns, NotifyListenerFactory};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - analysis service capabilities and the mode tracker
/// - file listener registry
/// - run scheduler and process backend
/// - runtime loop, stdin host and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let root_dir = config_root_dir(&config_path);
    let (rt_tx, rt_rx) = mpsc::unbounded_channel::<RuntimeEvent>();

    // Analysis service: the stdin host, offering the configured capabilities.
    // `--once` has no host, so nothing is offered.
    let initial_mode = args.mode.map(Into::into).unwrap_or(cfg.service.initial_mode);
    let capabilities = if args.once {
        Vec::new()
    } else {
        cfg.service.capabilities.clone()
    };
    let service = Arc::new(LineService::new(initial_mode, &capabilities));
    let tracker = Arc::new(ServerModeTracker::new(service.server_mode()));
    wire_capabilities(service.as_ref(), &ServiceListener::new(rt_tx.clone()));

    // File listeners, rebuilt per mode by the registry.
    let patterns = ModePatterns::from_config(&cfg.watch)?;
    let roots = cfg.watch.roots.iter().map(|r| root_dir.join(r)).collect();
    let factory = Arc::new(NotifyListenerFactory::new(roots, patterns, rt_tx.clone()));
    let registry = DebouncedWatcherRegistry::new(factory, tracker.clone(), cfg.watch.debounce());

    // Scheduler over the process backend.
    let results = Arc::new(ResultStore::new());
    let backend = Arc::new(ProcessBackend::new(cfg.runner.clone(), root_dir.clone()));
    let scheduler = RunnerScheduler::new(
        backend,
        results.clone(),
        SchedulerOptions {
            cancel_timeout: cfg.scheduler.cancel_timeout(),
        },
    );

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested);
        });
    }

    if !args.tests.is_empty() {
        let mode = if args.debug { RunMode::Debug } else { RunMode::Run };
        info!(tests = ?args.tests, %mode, "running startup tests");
        rt_tx.send(RuntimeEvent::command(UserCommand::Run {
            targets: args.tests.iter().map(TestItem::from_id).collect(),
            mode,
            launch: args.launch.clone(),
        }))
        .map_err(|_| anyhow::anyhow!("runtime event channel closed"))?;
    }

    let host = if args.once {
        None
    } else {
        let service = service.clone();
        let tx = rt_tx.clone();
        Some(tokio::spawn(async move {
            let lines = host::spawn_stdin_reader();
            if let Err(e) = host::serve_host(lines, tokio::io::stdout(), &service, tx).await {
                warn!(error = %format!("{e:#}"), "host stopped");
            }
        }))
    };

    let options = RuntimeOptions {
        busy_behaviour: cfg.scheduler.busy_behaviour,
        exit_when_idle: args.once,
        watch: !args.once,
    };
    let components = RuntimeComponents {
        scheduler,
        registry,
        tracker,
        results: results.clone(),
        presenter: Arc::new(LogPresenter),
        report: Arc::new(TextReport),
        launches: cfg.launch_configurations(),
    };

    let runtime = Runtime::new(components, rt_rx, rt_tx, options);
    runtime.run().await?;

    if let Some(host) = host {
        host.abort();
    }
    if args.once {
        TextReport.open(&results.snapshot());
    }
    Ok(())
}

/// Directory that relative watch roots and the runner's working directory
/// resolve against.
///
/// - If the config path has a non-empty parent (e.g. "ci/Testrelay.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Testrelay.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: print the resolved configuration.
fn print_dry_run(cfg: &ConfigFile) {
    println!("testrelay dry-run");
    println!("  scheduler.busy_behaviour = {:?}", cfg.scheduler.busy_behaviour);
    println!("  scheduler.cancel_timeout_ms = {}", cfg.scheduler.cancel_timeout_ms);
    println!("  service.initial_mode = {}", cfg.service.initial_mode);
    let caps: Vec<String> = cfg.service.capabilities.iter().map(|c| c.to_string()).collect();
    println!("  service.capabilities = [{}]", caps.join(", "));
    println!();

    println!("watch:");
    println!("  debounce_ms: {}", cfg.watch.debounce_ms);
    println!("  roots: {:?}", cfg.watch.roots);
    if !cfg.watch.patterns.is_empty() {
        println!("  patterns: {:?}", cfg.watch.patterns);
    }
    if !cfg.watch.light_weight_patterns.is_empty() {
        println!("  light_weight_patterns: {:?}", cfg.watch.light_weight_patterns);
    }
    if !cfg.watch.exclude.is_empty() {
        println!("  exclude: {:?}", cfg.watch.exclude);
    }
    println!();

    println!("runner:");
    println!("  program: {}", cfg.runner.program);
    if !cfg.runner.args.is_empty() {
        println!("  args: {:?}", cfg.runner.args);
    }
    if !cfg.runner.debug_args.is_empty() {
        println!("  debug_args: {:?}", cfg.runner.debug_args);
    }
    if !cfg.runner.attach.is_empty() {
        println!("  attach: {:?}", cfg.runner.attach);
    }
    if cfg.runner.args_file {
        println!("  args_file: true");
    }

    if !cfg.launch.is_empty() {
        println!();
        println!("launch configurations ({}):", cfg.launch.len());
        for (name, launch) in &cfg.launch {
            println!("  - {name}");
            if !launch.args.is_empty() {
                println!("      args: {:?}", launch.args);
            }
            if !launch.env.is_empty() {
                println!("      env: {:?}", launch.env);
            }
        }
    }

    debug!("dry-run complete (nothing started)");
}
