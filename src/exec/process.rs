// src/exec/process.rs

//! Production backend: runs the configured test runner as a child process.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunnerSection;
use crate::exec::backend::{
    BackendEvent, BackendExit, BoxFuture, ExecutionBackend, LaunchedSession, SessionControl,
};
use crate::exec::output::ResultLineParser;
use crate::run::{RunRequest, SessionId};
use crate::types::RunMode;

const EVENT_BUFFER: usize = 256;

/// Fully resolved command line for one session.
///
/// Argument order: runner args, debug args (Debug mode only), launch
/// configuration args, then the targets, either inline or as `@<file>`.
/// Launch configuration env entries override runner env entries.
#[derive(Debug)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub args_file: Option<NamedTempFile>,
}

impl LaunchPlan {
    pub fn build(runner: &RunnerSection, request: &RunRequest) -> Result<Self> {
        let mut args = runner.args.clone();
        if request.mode == RunMode::Debug {
            args.extend(runner.debug_args.iter().cloned());
        }

        let mut env = runner.env.clone();
        if let Some(launch) = &request.launch {
            args.extend(launch.args.iter().cloned());
            env.extend(launch.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut args_file = None;
        if runner.args_file {
            let file = write_targets_file(request)?;
            args.push(format!("@{}", file.path().display()));
            args_file = Some(file);
        } else {
            args.extend(request.targets.iter().map(|t| t.id.clone()));
        }

        Ok(Self {
            program: runner.program.clone(),
            args,
            env,
            args_file,
        })
    }
}

fn write_targets_file(request: &RunRequest) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("testrelay-targets-")
        .suffix(".txt")
        .tempfile()
        .context("creating targets file")?;
    for target in &request.targets {
        writeln!(file, "{}", target.id).context("writing targets file")?;
    }
    file.flush().context("flushing targets file")?;
    Ok(file)
}

/// Spawns the runner described by `[runner]` for every session.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    runner: RunnerSection,
    workdir: PathBuf,
}

impl ProcessBackend {
    pub fn new(runner: RunnerSection, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
        }
    }

    fn launch_blocking(&self, session: SessionId, request: &RunRequest) -> Result<LaunchedSession> {
        let parser = ResultLineParser::new()?;
        let plan = LaunchPlan::build(&self.runner, request)?;

        info!(
            session,
            mode = %request.mode,
            program = %plan.program,
            args = ?plan.args,
            "starting test runner"
        );

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .envs(&plan.env)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning test runner '{}'", plan.program))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            spawn_stdout_reader(session, stdout, parser, tx);
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(session, "runner stderr: {}", line);
                }
            });
        }

        let attach = if request.mode == RunMode::Debug && !self.runner.attach.is_empty() {
            match spawn_attach(&self.runner.attach, &self.workdir) {
                Ok(attach) => Some(attach),
                Err(err) => {
                    // The runner is useless without its debugger.
                    if let Err(e) = child.start_kill() {
                        warn!(session, error = %e, "failed to kill runner after attach failure");
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(LaunchedSession {
            events: rx,
            control: Box::new(ProcessControl {
                session,
                child,
                attach,
                args_file: plan.args_file,
            }),
        })
    }
}

impl ExecutionBackend for ProcessBackend {
    fn launch<'a>(
        &'a self,
        session: SessionId,
        request: &'a RunRequest,
    ) -> BoxFuture<'a, Result<LaunchedSession>> {
        Box::pin(async move { self.launch_blocking(session, request) })
    }
}

fn spawn_attach(attach: &[String], workdir: &Path) -> Result<Child> {
    let (program, args) = attach
        .split_first()
        .context("debugger attach command is empty")?;
    info!(program = %program, ?args, "attaching debugger");
    Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning debugger attach command '{program}'"))
}

/// Forward parsed stdout lines in order. The channel closes at EOF.
fn spawn_stdout_reader(
    session: SessionId,
    stdout: ChildStdout,
    parser: ResultLineParser,
    tx: mpsc::Sender<BackendEvent>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parser.parse_line(&line) {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            debug!(session, "scheduler stopped listening; dropping runner output");
                            break;
                        }
                    }
                    None => debug!(session, "runner stdout: {}", line),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(session, error = %e, "failed to read runner stdout");
                    break;
                }
            }
        }
    });
}

struct ProcessControl {
    session: SessionId,
    child: Child,
    attach: Option<Child>,
    args_file: Option<NamedTempFile>,
}

impl ProcessControl {
    async fn kill_attach(&mut self) {
        if let Some(mut attach) = self.attach.take() {
            if let Err(e) = attach.kill().await {
                debug!(session = self.session, error = %e, "debugger attach already gone");
            }
        }
    }
}

impl SessionControl for ProcessControl {
    fn wait(&mut self) -> BoxFuture<'_, BackendExit> {
        Box::pin(async move {
            let exit = match self.child.wait().await {
                Ok(status) if status.success() => BackendExit::Success,
                Ok(status) => match status.code() {
                    Some(code) => BackendExit::Code(code),
                    None => BackendExit::Abnormal(status.to_string()),
                },
                Err(e) => BackendExit::Abnormal(e.to_string()),
            };
            self.kill_attach().await;
            info!(session = self.session, %exit, "test runner exited");
            exit
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(session = self.session, "terminating test runner");
            if let Ok(Some(status)) = self.child.try_wait() {
                debug!(session = self.session, %status, "test runner already exited");
                self.kill_attach().await;
                return Ok(());
            }
            // `kill` sends the signal and reaps the child.
            self.child
                .kill()
                .await
                .with_context(|| format!("killing test runner of session {}", self.session))?;
            self.kill_attach().await;
            Ok(())
        })
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut attach) = self.attach.take() {
            if let Err(e) = attach.start_kill() {
                debug!(session = self.session, error = %e, "debugger attach already gone");
            }
        }
        if let Some(file) = self.args_file.take() {
            let path = file.path().to_path_buf();
            file.close()
                .with_context(|| format!("removing targets file {}", path.display()))?;
            debug!(session = self.session, path = %path.display(), "removed targets file");
        }
        Ok(())
    }
}
