// src/server/capabilities.rs

//! Optional notification capabilities of the analysis service.
//!
//! A service may support any subset of classpath updates, mode changes and
//! project imports. Each capability is probed exactly once, in
//! [`wire_capabilities`]; afterwards the runtime only ever sees the
//! notifications that were wired.

use std::fmt;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{RuntimeEvent, ServiceNotification};
use crate::types::ServerMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Classpath,
    ServerMode,
    ProjectImport,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Classpath => f.write_str("classpath"),
            Capability::ServerMode => f.write_str("server_mode"),
            Capability::ProjectImport => f.write_str("project_import"),
        }
    }
}

/// Handle given to a capability so it can push notifications into the
/// runtime. Cheap to clone; sending never blocks, so it is safe to call from
/// synchronous callbacks.
#[derive(Debug, Clone)]
pub struct ServiceListener {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl ServiceListener {
    pub fn new(tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self { tx }
    }

    pub fn classpath_updated(&self) {
        self.notify(ServiceNotification::ClasspathUpdated);
    }

    pub fn server_mode_changed(&self, mode: ServerMode) {
        self.notify(ServiceNotification::ServerModeChanged(mode));
    }

    pub fn projects_imported(&self) {
        self.notify(ServiceNotification::ProjectsImported);
    }

    fn notify(&self, notification: ServiceNotification) {
        if self.tx.send(RuntimeEvent::Service(notification)).is_err() {
            debug!(?notification, "runtime gone; dropping service notification");
        }
    }
}

pub trait ClasspathUpdates: Send + Sync {
    fn on_classpath_update(&self, listener: ServiceListener);
}

pub trait ServerModeChanges: Send + Sync {
    fn on_server_mode_change(&self, listener: ServiceListener);
}

pub trait ProjectImports: Send + Sync {
    fn on_projects_import(&self, listener: ServiceListener);
}

/// The analysis service as seen from the scheduler.
///
/// Every capability is optional; the defaults describe a service that
/// supports none of them and predates mode reporting.
pub trait AnalysisService: Send + Sync {
    fn server_mode(&self) -> ServerMode {
        ServerMode::Unknown
    }

    fn classpath_updates(&self) -> Option<&dyn ClasspathUpdates> {
        None
    }

    fn server_mode_changes(&self) -> Option<&dyn ServerModeChanges> {
        None
    }

    fn project_imports(&self) -> Option<&dyn ProjectImports> {
        None
    }
}

/// Which capabilities were found (and subscribed to) at wiring time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WiredCapabilities {
    pub classpath: bool,
    pub server_mode: bool,
    pub project_import: bool,
}

impl WiredCapabilities {
    pub fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::Classpath => self.classpath,
            Capability::ServerMode => self.server_mode,
            Capability::ProjectImport => self.project_import,
        }
    }
}

/// Subscribe `listener` to every capability `service` exposes.
pub fn wire_capabilities(service: &dyn AnalysisService, listener: &ServiceListener) -> WiredCapabilities {
    let mut wired = WiredCapabilities::default();

    if let Some(source) = service.classpath_updates() {
        source.on_classpath_update(listener.clone());
        wired.classpath = true;
    }
    if let Some(source) = service.server_mode_changes() {
        source.on_server_mode_change(listener.clone());
        wired.server_mode = true;
    }
    if let Some(source) = service.project_imports() {
        source.on_projects_import(listener.clone());
        wired.project_import = true;
    }

    info!(
        classpath = wired.classpath,
        server_mode = wired.server_mode,
        project_import = wired.project_import,
        "wired analysis service capabilities"
    );
    wired
}
