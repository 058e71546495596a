#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use testrelay::config::{
    ConfigFile, LaunchSection, RawConfigFile, RunnerSection, SchedulerSection, ServiceSection,
    WatchSection,
};
use testrelay::exec::ExecutionBackend;
use testrelay::run::{RunRequest, RunnerScheduler, SchedulerOptions, TestItem, TestResultSink};
use testrelay::server::Capability;
use testrelay::types::{BusyBehaviour, ServerMode};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                watch: WatchSection::default(),
                service: ServiceSection::default(),
                runner: RunnerBuilder::new(program).build(),
                launch: BTreeMap::new(),
            },
        }
    }

    pub fn with_runner(mut self, runner: RunnerSection) -> Self {
        self.config.runner = runner;
        self
    }

    pub fn with_busy_behaviour(mut self, behaviour: BusyBehaviour) -> Self {
        self.config.scheduler.busy_behaviour = behaviour;
        self
    }

    pub fn with_cancel_timeout_ms(mut self, ms: u64) -> Self {
        self.config.scheduler.cancel_timeout_ms = ms;
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.config.watch.debounce_ms = ms;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.config.watch.patterns.push(pattern.to_string());
        self
    }

    pub fn with_light_weight_pattern(mut self, pattern: &str) -> Self {
        self.config.watch.light_weight_patterns.push(pattern.to_string());
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.config.watch.exclude.push(pattern.to_string());
        self
    }

    pub fn with_initial_mode(mut self, mode: ServerMode) -> Self {
        self.config.service.initial_mode = mode;
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.config.service.capabilities = capabilities.to_vec();
        self
    }

    pub fn with_launch(mut self, name: &str, args: &[&str], env: &[(&str, &str)]) -> Self {
        self.config.launch.insert(
            name.to_string(),
            LaunchSection {
                args: args.iter().map(|a| a.to_string()).collect(),
                env: env
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        );
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `RunnerSection`.
pub struct RunnerBuilder {
    runner: RunnerSection,
}

impl RunnerBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            runner: RunnerSection {
                program: program.to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
                args_file: false,
                debug_args: Vec::new(),
                attach: Vec::new(),
            },
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.runner.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.runner.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn debug_arg(mut self, arg: &str) -> Self {
        self.runner.debug_args.push(arg.to_string());
        self
    }

    pub fn attach(mut self, command: &[&str]) -> Self {
        self.runner.attach = command.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn args_file(mut self, enabled: bool) -> Self {
        self.runner.args_file = enabled;
        self
    }

    pub fn build(self) -> RunnerSection {
        self.runner
    }
}

/// Test items from ids; ids containing `#` become test cases.
pub fn items(ids: &[&str]) -> Vec<TestItem> {
    ids.iter().map(|id| TestItem::from_id(*id)).collect()
}

pub fn run_request(ids: &[&str]) -> RunRequest {
    RunRequest::run(items(ids))
}

pub fn debug_request(ids: &[&str]) -> RunRequest {
    RunRequest::debug(items(ids))
}

/// A scheduler over the given backend and sink with a custom teardown bound.
pub fn scheduler_with(
    backend: Arc<dyn ExecutionBackend>,
    sink: Arc<dyn TestResultSink>,
    cancel_timeout: Duration,
) -> RunnerScheduler {
    RunnerScheduler::new(backend, sink, SchedulerOptions { cancel_timeout })
}
