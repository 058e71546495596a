// src/watch/registry.rs

//! Owner of the active file listener set.
//!
//! `register_listeners` always replaces the whole set: the old listeners are
//! disposed before the new ones are bound, under one lock, so there is never
//! a moment where both sets deliver callbacks. With `debounce = true` the
//! replacement is deferred by the debounce window and restarted by every
//! further call (trailing debounce). With `debounce = false` it happens
//! immediately and supersedes anything pending.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::server::ServerModeTracker;
use crate::types::ServerMode;
use crate::watch::listener::{ListenerFactory, ListenerSet};
use crate::watch::timer::DebounceTimer;

struct RegistryState {
    active: Option<ListenerSet>,
    /// Bumped by every request; a debounced bind only runs if it still
    /// carries the latest generation when it fires.
    generation: u64,
    timer: DebounceTimer,
    binds: u64,
}

struct Shared {
    state: Mutex<RegistryState>,
    factory: Arc<dyn ListenerFactory>,
    tracker: Arc<ServerModeTracker>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(generation, latest = state.generation, "skipping superseded listener rebind");
            return;
        }
        self.rebind(&mut state);
    }

    fn rebind(&self, state: &mut RegistryState) {
        if let Some(previous) = state.active.take() {
            previous.dispose();
        }

        let mode = self.tracker.get();
        match self.factory.bind(mode) {
            Ok(set) => {
                state.binds += 1;
                info!(?mode, listeners = set.len(), binds = state.binds, "file listeners registered");
                state.active = Some(set);
            }
            Err(err) => {
                warn!(?mode, error = %format!("{err:#}"), "failed to register file listeners");
            }
        }
    }
}

#[derive(Clone)]
pub struct DebouncedWatcherRegistry {
    shared: Arc<Shared>,
}

impl fmt::Debug for DebouncedWatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("DebouncedWatcherRegistry")
            .field("active", &state.active)
            .field("generation", &state.generation)
            .field("binds", &state.binds)
            .finish()
    }
}

impl DebouncedWatcherRegistry {
    pub fn new(
        factory: Arc<dyn ListenerFactory>,
        tracker: Arc<ServerModeTracker>,
        debounce: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState {
                    active: None,
                    generation: 0,
                    timer: DebounceTimer::new(debounce),
                    binds: 0,
                }),
                factory,
                tracker,
            }),
        }
    }

    /// Replace the active listeners with a set bound to the current mode.
    ///
    /// Safe to call rapidly from any notification handler. Debounced calls
    /// need a Tokio runtime.
    pub fn register_listeners(&self, debounce: bool) {
        let mut state = self.shared.lock();
        state.generation += 1;
        let generation = state.generation;

        if debounce {
            let weak: Weak<Shared> = Arc::downgrade(&self.shared);
            state.timer.arm(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.fire(generation);
                }
            });
            debug!(generation, delay = ?state.timer.delay(), "listener rebind scheduled");
        } else {
            if state.timer.cancel() {
                debug!(generation, "pending debounced rebind superseded");
            }
            self.shared.rebind(&mut state);
        }
    }

    /// Stop all listeners and forget any pending rebind.
    pub fn dispose(&self) {
        let mut state = self.shared.lock();
        state.generation += 1;
        state.timer.cancel();
        if let Some(active) = state.active.take() {
            active.dispose();
        }
    }

    /// Mode the active set was bound for, if any set is active.
    pub fn active_mode(&self) -> Option<ServerMode> {
        self.shared.lock().active.as_ref().map(ListenerSet::mode)
    }

    pub fn active_listener_count(&self) -> usize {
        self.shared.lock().active.as_ref().map_or(0, ListenerSet::len)
    }

    /// Number of successful binds since creation.
    pub fn bind_count(&self) -> u64 {
        self.shared.lock().binds
    }

    pub fn has_pending_rebind(&self) -> bool {
        self.shared.lock().timer.is_armed()
    }
}
