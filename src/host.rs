// src/host.rs

//! Line-oriented host surface.
//!
//! The host stands in for both the editor UI and the analysis service: each
//! stdin line is either a user command (`run`, `debug`, `relaunch`,
//! `cancel`, `report`) or a service notification (`classpath`, `mode`,
//! `import`). Command outcomes are written back one line each.

use std::io::BufRead;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::{RuntimeEvent, ServiceNotification, UserCommand};
use crate::run::TestItem;
use crate::server::{
    AnalysisService, Capability, ClasspathUpdates, ProjectImports, ServerModeChanges,
    ServiceListener,
};
use crate::types::{RunMode, ServerMode};

/// One parsed host line.
#[derive(Debug, Clone, PartialEq)]
pub enum HostLine {
    Command(UserCommand),
    Notification(ServiceNotification),
    Quit,
    /// Blank line or `#` comment.
    Nothing,
}

/// Parse a single host line.
///
/// ```text
/// run [--launch NAME] ID...
/// debug [--launch NAME] ID...
/// relaunch | cancel | report [ID...]
/// classpath | import | mode light|standard|hybrid
/// quit
/// ```
pub fn parse_host_line(line: &str) -> Result<HostLine, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(HostLine::Nothing);
    }

    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(HostLine::Nothing);
    };
    let rest: Vec<&str> = words.collect();

    match verb {
        "run" | "debug" => {
            let mode = if verb == "run" {
                RunMode::Run
            } else {
                RunMode::Debug
            };
            let (launch, ids) = match rest.as_slice() {
                ["--launch", name, ids @ ..] => (Some((*name).to_string()), ids),
                ["--launch"] => return Err("--launch needs a configuration name".to_string()),
                ids => (None, ids),
            };
            Ok(HostLine::Command(UserCommand::Run {
                targets: ids.iter().map(|id| TestItem::from_id(*id)).collect(),
                mode,
                launch,
            }))
        }
        "relaunch" => no_args(verb, &rest, HostLine::Command(UserCommand::Relaunch)),
        "cancel" => no_args(verb, &rest, HostLine::Command(UserCommand::Cancel)),
        "report" => Ok(HostLine::Command(UserCommand::OpenReport {
            items: rest.iter().map(|id| (*id).to_string()).collect(),
        })),
        "classpath" => no_args(
            verb,
            &rest,
            HostLine::Notification(ServiceNotification::ClasspathUpdated),
        ),
        "import" => no_args(
            verb,
            &rest,
            HostLine::Notification(ServiceNotification::ProjectsImported),
        ),
        "mode" => match rest.as_slice() {
            [mode] => {
                let mode: ServerMode = mode.parse()?;
                Ok(HostLine::Notification(
                    ServiceNotification::ServerModeChanged(mode),
                ))
            }
            _ => Err("usage: mode light|standard|hybrid".to_string()),
        },
        "quit" | "exit" => no_args(verb, &rest, HostLine::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn no_args(verb: &str, rest: &[&str], line: HostLine) -> Result<HostLine, String> {
    if rest.is_empty() {
        Ok(line)
    } else {
        Err(format!("'{verb}' takes no arguments"))
    }
}

/// Subscription point for one capability.
#[derive(Debug, Default)]
struct Subscription {
    listener: Mutex<Option<ServiceListener>>,
}

impl Subscription {
    fn set(&self, listener: ServiceListener) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn get(&self) -> Option<ServiceListener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ClasspathUpdates for Subscription {
    fn on_classpath_update(&self, listener: ServiceListener) {
        self.set(listener);
    }
}

impl ServerModeChanges for Subscription {
    fn on_server_mode_change(&self, listener: ServiceListener) {
        self.set(listener);
    }
}

impl ProjectImports for Subscription {
    fn on_projects_import(&self, listener: ServiceListener) {
        self.set(listener);
    }
}

/// Analysis service driven by host lines, exposing the configured
/// capabilities only.
#[derive(Debug)]
pub struct LineService {
    initial_mode: ServerMode,
    classpath: Option<Subscription>,
    server_mode: Option<Subscription>,
    project_import: Option<Subscription>,
}

impl LineService {
    pub fn new(initial_mode: ServerMode, capabilities: &[Capability]) -> Self {
        let slot = |cap| capabilities.contains(&cap).then(Subscription::default);
        Self {
            initial_mode,
            classpath: slot(Capability::Classpath),
            server_mode: slot(Capability::ServerMode),
            project_import: slot(Capability::ProjectImport),
        }
    }

    /// Push `notification` to its subscriber.
    ///
    /// Returns `false` if the capability is not offered or nobody
    /// subscribed to it.
    pub fn deliver(&self, notification: ServiceNotification) -> bool {
        let slot = match notification {
            ServiceNotification::ClasspathUpdated => &self.classpath,
            ServiceNotification::ServerModeChanged(_) => &self.server_mode,
            ServiceNotification::ProjectsImported => &self.project_import,
        };
        let Some(listener) = slot.as_ref().and_then(Subscription::get) else {
            return false;
        };
        match notification {
            ServiceNotification::ClasspathUpdated => listener.classpath_updated(),
            ServiceNotification::ServerModeChanged(mode) => listener.server_mode_changed(mode),
            ServiceNotification::ProjectsImported => listener.projects_imported(),
        }
        true
    }
}

impl AnalysisService for LineService {
    fn server_mode(&self) -> ServerMode {
        self.initial_mode
    }

    fn classpath_updates(&self) -> Option<&dyn ClasspathUpdates> {
        self.classpath.as_ref().map(|s| s as &dyn ClasspathUpdates)
    }

    fn server_mode_changes(&self) -> Option<&dyn ServerModeChanges> {
        self.server_mode.as_ref().map(|s| s as &dyn ServerModeChanges)
    }

    fn project_imports(&self) -> Option<&dyn ProjectImports> {
        self.project_import.as_ref().map(|s| s as &dyn ProjectImports)
    }
}

/// Read stdin on a plain thread so a pending read never holds up exit.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
        debug!("stdin closed");
    });
    rx
}

/// Serve host lines until `quit` or end of input, then ask the runtime to
/// shut down.
pub async fn serve_host<W>(
    mut lines: mpsc::UnboundedReceiver<String>,
    mut out: W,
    service: &LineService,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        let reply = match parse_host_line(&line) {
            Ok(HostLine::Nothing) => continue,
            Ok(HostLine::Quit) => break,
            Ok(HostLine::Notification(notification)) => {
                if service.deliver(notification) {
                    "ok".to_string()
                } else {
                    format!("error capability not offered: {line}")
                }
            }
            Ok(HostLine::Command(command)) => {
                let (tx, rx) = oneshot::channel();
                let event = RuntimeEvent::Command {
                    command,
                    reply: Some(tx),
                };
                if events.send(event).is_err() {
                    break;
                }
                match rx.await {
                    Ok(outcome) => outcome.to_string(),
                    Err(_) => break,
                }
            }
            Err(msg) => format!("error {msg}"),
        };
        out.write_all(reply.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
    }

    info!("host input finished");
    let _ = events.send(RuntimeEvent::ShutdownRequested);
    Ok(())
}
