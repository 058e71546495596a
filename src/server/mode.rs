// src/server/mode.rs

use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::types::ServerMode;

/// Last-known operating mode of the analysis service.
///
/// Only the mode-change notification handler writes to it; the watcher
/// registry reads it when binding listeners. The tracker never performs IO.
#[derive(Debug, Default)]
pub struct ServerModeTracker {
    mode: Mutex<ServerMode>,
}

impl ServerModeTracker {
    pub fn new(initial: ServerMode) -> Self {
        Self {
            mode: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> ServerMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `mode`, returning `true` if it differs from the previous value.
    pub fn set(&self, mode: ServerMode) -> bool {
        let mut guard = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, mode);
        let changed = previous != mode;
        debug!(?previous, current = ?mode, changed, "server mode updated");
        changed
    }

    pub fn is_standard_ready(&self) -> bool {
        self.get().is_standard_ready()
    }

    pub fn is_light_weight(&self) -> bool {
        self.get() == ServerMode::LightWeight
    }

    pub fn is_hybrid(&self) -> bool {
        self.get() == ServerMode::Hybrid
    }
}
