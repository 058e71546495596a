// src/engine/runtime.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, SchedulerError};
use crate::run::{
    LaunchConfiguration, ResultStore, RunRequest, RunRequestQueue, RunnerScheduler,
    SchedulerStatus, SessionHandle, SessionReport,
};
use crate::present::{Presenter, RefreshScope, ReportOpener};
use crate::server::ServerModeTracker;
use crate::types::BusyBehaviour;
use crate::watch::{ContentHashes, DebouncedWatcherRegistry};

use super::core::route_notification;
use super::{CommandOutcome, RuntimeEvent, RuntimeOptions, UserCommand};

/// Long-lived collaborators the runtime drives.
pub struct RuntimeComponents {
    pub scheduler: RunnerScheduler,
    pub registry: DebouncedWatcherRegistry,
    pub tracker: Arc<ServerModeTracker>,
    pub results: Arc<ResultStore>,
    pub presenter: Arc<dyn Presenter>,
    pub report: Arc<dyn ReportOpener>,
    /// Named launch configurations, by name.
    pub launches: BTreeMap<String, LaunchConfiguration>,
}

/// Reacts to [`RuntimeEvent`]s: routes service notifications to the
/// listener registry, turns user commands into scheduler calls, and keeps
/// the run queue moving as sessions end.
///
/// Only this loop touches the queue, so queue order is arrival order.
pub struct Runtime {
    scheduler: RunnerScheduler,
    registry: DebouncedWatcherRegistry,
    tracker: Arc<ServerModeTracker>,
    results: Arc<ResultStore>,
    presenter: Arc<dyn Presenter>,
    report: Arc<dyn ReportOpener>,
    launches: BTreeMap<String, LaunchConfiguration>,
    queue: RunRequestQueue,
    hashes: ContentHashes,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    /// Handed to session waiters so completions come back through the loop.
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    options: RuntimeOptions,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler.status())
            .field("registry", &self.registry)
            .field("queue", &self.queue.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        components: RuntimeComponents,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        event_tx: mpsc::UnboundedSender<RuntimeEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler: components.scheduler,
            registry: components.registry,
            tracker: components.tracker,
            results: components.results,
            presenter: components.presenter,
            report: components.report,
            launches: components.launches,
            queue: RunRequestQueue::new(),
            hashes: ContentHashes::new(),
            event_rx,
            event_tx,
            options,
        }
    }

    /// Main event loop.
    ///
    /// Returns after a shutdown request, or once idle when
    /// `exit_when_idle` is set. Every active session is torn down before
    /// returning.
    pub async fn run(mut self) -> Result<()> {
        info!(mode = %self.tracker.get(), "testrelay runtime started");

        self.scheduler.initialize().await;
        if self.options.watch {
            self.registry.register_listeners(false);
        }

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            if !self.handle_event(event).await {
                break;
            }

            if self.options.exit_when_idle && self.is_quiescent() {
                info!("nothing running or queued; stopping runtime");
                break;
            }
        }

        self.shutdown().await;
        info!("runtime exiting");
        Ok(())
    }

    /// Returns `false` when the loop should stop.
    async fn handle_event(&mut self, event: RuntimeEvent) -> bool {
        match event {
            RuntimeEvent::Service(notification) => {
                let step = route_notification(&self.tracker, notification);
                if let Some(scope) = step.refresh {
                    self.presenter.refresh(scope);
                }
                if let Some(debounce) = step.rebind {
                    self.registry.register_listeners(debounce);
                }
            }
            RuntimeEvent::Command { command, reply } => {
                let outcome = self.handle_command(command).await;
                match &outcome {
                    CommandOutcome::Rejected(err) if err.is_runtime_failure() => {
                        warn!(error = %err, "command failed")
                    }
                    CommandOutcome::Rejected(err) => info!(reason = %err, "command rejected"),
                    other => debug!(outcome = %other, "command handled"),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            RuntimeEvent::FileChanged { path, kind } => {
                if self.hashes.observe(&path, kind) {
                    self.presenter.refresh(RefreshScope::File(path));
                } else {
                    debug!(path = %path.display(), "content unchanged; ignoring");
                }
            }
            RuntimeEvent::SessionEnded(report) => {
                self.on_session_ended(report);
                self.start_next_queued().await;
            }
            RuntimeEvent::ShutdownRequested => {
                info!("shutdown requested");
                return false;
            }
        }
        true
    }

    async fn handle_command(&mut self, command: UserCommand) -> CommandOutcome {
        match command {
            UserCommand::Run {
                targets,
                mode,
                launch,
            } => {
                let mut request = RunRequest::new(targets, mode);
                if let Some(name) = launch {
                    match self.launches.get(&name) {
                        Some(config) => request = request.with_launch(config.clone()),
                        None => {
                            return CommandOutcome::Rejected(SchedulerError::InvalidRequest(
                                format!("unknown launch configuration '{name}'"),
                            ));
                        }
                    }
                }
                self.start_or_queue(request).await
            }
            UserCommand::Relaunch => {
                let queueing = self.options.busy_behaviour == BusyBehaviour::Queue;
                // Requests already waiting go first, even if the scheduler
                // went idle before their turn came up.
                if queueing && !self.queue.is_empty() {
                    return self.enqueue_relaunch();
                }
                match self.scheduler.relaunch().await {
                    Ok(handle) => self.track(handle),
                    Err(SchedulerError::Busy { .. }) if queueing => self.enqueue_relaunch(),
                    Err(err) => CommandOutcome::Rejected(err),
                }
            }
            UserCommand::Cancel => {
                let superseded = self.queue.drain_pending();
                for request in &superseded {
                    info!(targets = ?request.target_ids(), "queued request superseded by cancel");
                }
                match self.scheduler.clean_up(true).await {
                    Ok(session) => CommandOutcome::Cancelled {
                        session: session.map(|s| s.id),
                        superseded: superseded.len(),
                    },
                    Err(err) => CommandOutcome::Rejected(err),
                }
            }
            UserCommand::OpenReport { items } => {
                let results = if items.is_empty() {
                    self.results.snapshot()
                } else {
                    self.results.results_for(&items)
                };
                self.report.open(&results);
                CommandOutcome::ReportOpened {
                    results: results.len(),
                }
            }
        }
    }

    async fn start_or_queue(&mut self, request: RunRequest) -> CommandOutcome {
        if let Err(err) = request.validate() {
            return CommandOutcome::Rejected(err);
        }

        let queueing = self.options.busy_behaviour == BusyBehaviour::Queue;
        // Only this loop submits, so idleness cannot change before `submit`.
        if queueing && (!self.queue.is_empty() || self.scheduler.active_session().is_some()) {
            return self.enqueue(request);
        }

        match self.scheduler.submit(request).await {
            Ok(handle) => self.track(handle),
            Err(err) => CommandOutcome::Rejected(err),
        }
    }

    fn enqueue(&mut self, request: RunRequest) -> CommandOutcome {
        if self.scheduler.status() == SchedulerStatus::ShuttingDown {
            return CommandOutcome::Rejected(SchedulerError::ShuttingDown);
        }
        match self.queue.enqueue(request) {
            Ok(()) => {
                let position = self.queue.len();
                info!(position, "run request queued behind active session");
                CommandOutcome::Queued { position }
            }
            Err(err) => CommandOutcome::Rejected(err),
        }
    }

    fn enqueue_relaunch(&mut self) -> CommandOutcome {
        match self.scheduler.last_completed_request() {
            Some(previous) => self.enqueue(previous.replay()),
            None => CommandOutcome::Rejected(SchedulerError::NoPriorRequest),
        }
    }

    /// Forward the session's completion back into the loop.
    fn track(&self, handle: SessionHandle) -> CommandOutcome {
        let id = handle.id();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let report = handle.wait().await;
            if tx.send(RuntimeEvent::SessionEnded(report)).is_err() {
                debug!(session = id, "runtime gone; dropping session report");
            }
        });
        CommandOutcome::Started(id)
    }

    fn on_session_ended(&self, report: SessionReport) {
        let session = &report.session;
        match &report.error {
            Some(err) => warn!(session = session.id, state = %session.state, error = %err, "session ended with error"),
            None => info!(session = session.id, state = %session.state, "session ended"),
        }
        for target in &session.request.targets {
            self.presenter.refresh(RefreshScope::Item(target.id.clone()));
        }
    }

    async fn start_next_queued(&mut self) {
        while self.scheduler.is_idle() {
            let Some(request) = self.queue.dequeue_next() else {
                return;
            };
            match self.scheduler.submit(request).await {
                Ok(handle) => {
                    let outcome = self.track(handle);
                    info!(outcome = %outcome, remaining = self.queue.len(), "started queued request");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "queued request could not start; trying the next one");
                }
            }
        }
    }

    fn is_quiescent(&self) -> bool {
        self.scheduler.is_idle() && self.queue.is_empty()
    }

    async fn shutdown(&mut self) {
        self.registry.dispose();

        let dropped = self.queue.drain_pending();
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "dropping queued run requests at shutdown");
        }

        match self.scheduler.clean_up(false).await {
            Ok(Some(session)) => {
                info!(session = session.id, state = %session.state, "active session shut down")
            }
            Ok(None) => debug!("no active session at shutdown"),
            Err(err) => error!(error = %err, "failed to shut down active session"),
        }
    }
}
