// src/run/scheduler.rs

//! Single-flight run/debug scheduler.
//!
//! State machine: `Idle -> Busy(session) -> Idle`, plus the terminal
//! `ShuttingDown` reached through `clean_up(false)`.
//!
//! All state lives behind one `std::sync::Mutex` that is never held across
//! an `.await`. Every operation checks and claims the state before its first
//! suspension point, so two callers can never both observe `Idle`.
//!
//! Each launched session is driven by its own Tokio task that forwards
//! backend events to the [`TestResultSink`] in order, waits for the backend
//! to exit, and performs teardown when asked to by `clean_up`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_CANCEL_TIMEOUT_MS;
use crate::errors::SchedulerError;
use crate::exec::{BackendEvent, BackendExit, ExecutionBackend, LaunchedSession, SessionControl};
use crate::run::request::RunRequest;
use crate::run::session::{RunSession, SessionId, SessionState, Teardown};
use crate::run::sink::TestResultSink;

/// Extra time `clean_up` grants the session driver on top of the backend
/// teardown bound before forcing the scheduler back to idle.
const DRIVER_GRACE: Duration = Duration::from_millis(250);

/// How long output is still collected after the backend has exited.
const EXIT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// Bound on waiting for the backend to confirm teardown.
    pub cancel_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            cancel_timeout: Duration::from_millis(DEFAULT_CANCEL_TIMEOUT_MS),
        }
    }
}

/// Coarse scheduler status for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Idle,
    Busy(SessionId),
    ShuttingDown,
}

/// Final outcome of a session as delivered through a [`SessionHandle`].
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: RunSession,
    pub error: Option<SchedulerError>,
}

impl SessionReport {
    pub fn into_result(self) -> Result<RunSession, SchedulerError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.session),
        }
    }
}

/// Resolves once the submitted session reaches a terminal state.
#[derive(Debug)]
pub struct SessionHandle {
    session: RunSession,
    done: oneshot::Receiver<SessionReport>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub async fn wait(self) -> SessionReport {
        match self.done.await {
            Ok(report) => report,
            Err(_) => {
                let mut session = self.session;
                session.finish(SessionState::Failed);
                SessionReport {
                    error: Some(SchedulerError::BackendCrashed {
                        session: session.id,
                        exit: "session driver stopped unexpectedly".to_string(),
                    }),
                    session,
                }
            }
        }
    }
}

struct TeardownRequest {
    kind: Teardown,
    ack: oneshot::Sender<TeardownAck>,
}

struct TeardownAck {
    session: RunSession,
    confirmed: bool,
}

struct ActiveSession {
    session: RunSession,
    /// Taken by the first `clean_up` that targets this session.
    teardown_tx: Option<oneshot::Sender<TeardownRequest>>,
}

enum State {
    Idle,
    Busy(ActiveSession),
    ShuttingDown,
}

struct Inner {
    state: State,
    last_completed: Option<RunRequest>,
    next_id: SessionId,
    /// A shutdown arrived while another teardown was already in flight.
    shutdown_requested: bool,
}

/// The run/debug orchestrator. Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct RunnerScheduler {
    inner: Arc<Mutex<Inner>>,
    busy: Arc<watch::Sender<bool>>,
    backend: Arc<dyn ExecutionBackend>,
    sink: Arc<dyn TestResultSink>,
    options: SchedulerOptions,
}

impl fmt::Debug for RunnerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerScheduler")
            .field("status", &self.status())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RunnerScheduler {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        sink: Arc<dyn TestResultSink>,
        options: SchedulerOptions,
    ) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Idle,
                last_completed: None,
                next_id: 1,
                shutdown_requested: false,
            })),
            busy: Arc::new(busy),
            backend,
            sink,
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter `Idle`, discarding any session left over from a previous
    /// activation.
    ///
    /// A stale session's driver stops its backend and releases its
    /// resources. The scheduler stays `Busy` until that has happened (or the
    /// teardown bound ran out), so no new backend can start alongside it.
    pub async fn initialize(&self) {
        let stale = {
            let mut inner = self.lock();
            inner.shutdown_requested = false;
            match &mut inner.state {
                State::Busy(active) => {
                    // Dropping the sender orphans the driver.
                    active.teardown_tx = None;
                    Some(active.session.id)
                }
                _ => None,
            }
        };

        if let Some(id) = stale {
            warn!(session = id, "discarding stale session on initialize");
            let bound = self.options.cancel_timeout + DRIVER_GRACE;
            if timeout(bound, self.wait_until_idle()).await.is_err() {
                error!(session = id, "stale session did not stop in time; forcing idle");
            }
        }

        {
            let mut inner = self.lock();
            inner.state = State::Idle;
            inner.shutdown_requested = false;
        }
        self.busy.send_replace(false);
        info!("run scheduler initialized");
    }

    pub fn status(&self) -> SchedulerStatus {
        match &self.lock().state {
            State::Idle => SchedulerStatus::Idle,
            State::Busy(active) => SchedulerStatus::Busy(active.session.id),
            State::ShuttingDown => SchedulerStatus::ShuttingDown,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status() == SchedulerStatus::Idle
    }

    /// Snapshot of the active session, if any.
    pub fn active_session(&self) -> Option<RunSession> {
        match &self.lock().state {
            State::Busy(active) => Some(active.session.clone()),
            _ => None,
        }
    }

    /// The request `relaunch` would replay.
    pub fn last_completed_request(&self) -> Option<RunRequest> {
        self.lock().last_completed.clone()
    }

    /// Resolve once no session is active.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.busy.subscribe();
        // Only fails if the sender is gone, and `self` holds it.
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Start a session for `request`.
    ///
    /// Fails with `InvalidRequest` for an empty target list, `Busy` while
    /// another session is active, `ShuttingDown` after shutdown, and
    /// `LaunchFailed` if the backend cannot be started (the scheduler is idle
    /// again when that error is returned).
    pub async fn submit(&self, request: RunRequest) -> Result<SessionHandle, SchedulerError> {
        request.validate()?;

        let (id, teardown_rx) = {
            let mut inner = self.lock();
            match &inner.state {
                State::ShuttingDown => return Err(SchedulerError::ShuttingDown),
                State::Busy(active) => {
                    return Err(SchedulerError::Busy {
                        active: active.session.id,
                    });
                }
                State::Idle => {}
            }

            let id = inner.next_id;
            inner.next_id += 1;

            let mut session = RunSession::new(id, request.clone());
            session.advance(SessionState::Starting);
            let (teardown_tx, teardown_rx) = oneshot::channel();
            inner.state = State::Busy(ActiveSession {
                session,
                teardown_tx: Some(teardown_tx),
            });
            (id, teardown_rx)
        };
        self.busy.send_replace(true);

        info!(
            session = id,
            mode = %request.mode,
            targets = ?request.target_ids(),
            "launching test session"
        );

        let launched = match self.backend.launch(id, &request).await {
            Ok(launched) => launched,
            Err(err) => {
                let cause = format!("{err:#}");
                error!(session = id, %cause, "test backend failed to launch");
                if let Some(session) =
                    self.finish_active(id, |s| s.finish(SessionState::Failed), None)
                {
                    self.sink.session_ended(&session);
                }
                return Err(SchedulerError::LaunchFailed { cause });
            }
        };

        let Some(session) = self.update_active(id, |s| s.advance(SessionState::Running)) else {
            // clean_up gave up waiting on us and already forced the scheduler
            // back to idle; the backend we just started has no owner.
            warn!(session = id, "session was abandoned during launch; stopping backend");
            let LaunchedSession { mut control, .. } = launched;
            let bound = self.options.cancel_timeout;
            tokio::spawn(async move {
                if !matches!(timeout(bound, control.terminate()).await, Ok(Ok(()))) {
                    warn!(session = id, "abandoned backend did not confirm termination");
                }
                if let Err(e) = control.release() {
                    warn!(session = id, error = %e, "failed to release abandoned session resources");
                }
            });
            return Err(SchedulerError::CancelTimeout { session: id });
        };

        self.sink.session_started(&session);

        let (done_tx, done_rx) = oneshot::channel();
        let driver = SessionDriver {
            scheduler: self.clone(),
            session: session.clone(),
        };
        tokio::spawn(driver.run(launched, teardown_rx, done_tx));

        Ok(SessionHandle {
            session,
            done: done_rx,
        })
    }

    /// Re-submit the most recently completed request as a new request.
    pub async fn relaunch(&self) -> Result<SessionHandle, SchedulerError> {
        let previous = self
            .lock()
            .last_completed
            .clone()
            .ok_or(SchedulerError::NoPriorRequest)?;
        debug!(targets = ?previous.target_ids(), mode = %previous.mode, "relaunching last request");
        self.submit(previous.replay()).await
    }

    /// Tear down the active session, if any.
    ///
    /// - `is_cancel = true`: user cancellation. The session ends `Cancelled`
    ///   and the scheduler is ready for more work.
    /// - `is_cancel = false`: shutdown. The session ends `Completed` (torn
    ///   down), held OS resources are released, and the scheduler enters
    ///   `ShuttingDown` for good.
    ///
    /// Returns the torn-down session, or `None` when there was nothing to
    /// tear down. Fails with `CancelTimeout` if the backend did not confirm
    /// teardown in time; the scheduler is not left busy in that case either.
    pub async fn clean_up(&self, is_cancel: bool) -> Result<Option<RunSession>, SchedulerError> {
        let kind = if is_cancel {
            Teardown::Cancelled
        } else {
            Teardown::Shutdown
        };

        let claim = {
            let mut inner = self.lock();
            let claimed = match &mut inner.state {
                State::Idle => None,
                State::ShuttingDown => return Ok(None),
                State::Busy(active) => Some((active.session.id, active.teardown_tx.take())),
            };
            match claimed {
                None => {
                    if !is_cancel {
                        inner.state = State::ShuttingDown;
                        info!("run scheduler shutting down (idle)");
                    }
                    return Ok(None);
                }
                Some((id, Some(tx))) => TeardownClaim::Owned(id, tx),
                Some((id, None)) => {
                    if !is_cancel {
                        inner.shutdown_requested = true;
                    }
                    TeardownClaim::InProgress(id)
                }
            }
        };

        let (id, teardown_tx) = match claim {
            TeardownClaim::Owned(id, tx) => (id, tx),
            TeardownClaim::InProgress(id) => {
                debug!(session = id, "teardown already in progress");
                self.await_other_teardown(id).await?;
                return Ok(None);
            }
        };

        info!(session = id, ?kind, "tearing down test session");

        let (ack_tx, ack_rx) = oneshot::channel();
        if teardown_tx
            .send(TeardownRequest { kind, ack: ack_tx })
            .is_err()
        {
            // The session ended on its own before the request could be seen.
            self.after_natural_end(is_cancel);
            return Ok(None);
        }

        match timeout(self.options.cancel_timeout + DRIVER_GRACE, ack_rx).await {
            Ok(Ok(ack)) if ack.confirmed => Ok(Some(ack.session)),
            Ok(Ok(ack)) => {
                error!(session = id, "backend teardown not confirmed; resources may leak");
                Err(SchedulerError::CancelTimeout {
                    session: ack.session.id,
                })
            }
            Ok(Err(_)) => {
                self.after_natural_end(is_cancel);
                Ok(None)
            }
            Err(_) => {
                error!(session = id, "session driver did not confirm teardown; forcing idle");
                self.finish_active(
                    id,
                    |s| {
                        s.teardown = Some(kind);
                        s.cleanup_confirmed = false;
                        s.finish(terminal_state_for(kind));
                    },
                    Some(kind),
                );
                Err(SchedulerError::CancelTimeout { session: id })
            }
        }
    }

    async fn await_other_teardown(&self, id: SessionId) -> Result<(), SchedulerError> {
        let bound = self.options.cancel_timeout + DRIVER_GRACE;
        if timeout(bound, self.wait_until_idle()).await.is_err() {
            error!(session = id, "concurrent teardown did not finish in time");
            return Err(SchedulerError::CancelTimeout { session: id });
        }
        Ok(())
    }

    fn after_natural_end(&self, is_cancel: bool) {
        if is_cancel {
            return;
        }
        let mut inner = self.lock();
        if matches!(inner.state, State::Idle) {
            inner.state = State::ShuttingDown;
            info!("run scheduler shutting down");
        } else {
            inner.shutdown_requested = true;
        }
    }

    fn update_active(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut RunSession),
    ) -> Option<RunSession> {
        let mut inner = self.lock();
        match &mut inner.state {
            State::Busy(active) if active.session.id == id => {
                f(&mut active.session);
                Some(active.session.clone())
            }
            _ => None,
        }
    }

    /// Apply the terminal transition to session `id` and leave `Busy`.
    ///
    /// Returns `None` if `id` is no longer the active session.
    fn finish_active(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut RunSession),
        teardown: Option<Teardown>,
    ) -> Option<RunSession> {
        let mut inner = self.lock();
        let session = match &mut inner.state {
            State::Busy(active) if active.session.id == id => {
                f(&mut active.session);
                active.session.clone()
            }
            _ => return None,
        };

        if session.state == SessionState::Completed && session.teardown.is_none() {
            inner.last_completed = Some(session.request.clone());
        }

        let shutting_down = teardown == Some(Teardown::Shutdown) || inner.shutdown_requested;
        inner.state = if shutting_down {
            State::ShuttingDown
        } else {
            State::Idle
        };
        drop(inner);

        self.busy.send_replace(false);
        debug!(session = id, state = %session.state, shutting_down, "session finished");
        Some(session)
    }
}

fn terminal_state_for(kind: Teardown) -> SessionState {
    match kind {
        Teardown::Cancelled => SessionState::Cancelled,
        Teardown::Shutdown => SessionState::Completed,
    }
}

enum TeardownClaim {
    Owned(SessionId, oneshot::Sender<TeardownRequest>),
    InProgress(SessionId),
}

enum DriveOutcome {
    Exited(BackendExit),
    Teardown(TeardownRequest),
    /// The scheduler forgot this session (re-initialized).
    Orphaned,
}

struct SessionDriver {
    scheduler: RunnerScheduler,
    session: RunSession,
}

impl SessionDriver {
    async fn run(
        self,
        launched: LaunchedSession,
        mut teardown_rx: oneshot::Receiver<TeardownRequest>,
        done_tx: oneshot::Sender<SessionReport>,
    ) {
        let id = self.session.id;
        let LaunchedSession {
            mut events,
            mut control,
        } = launched;

        let mut finished_marker = false;
        let mut stream_open = true;

        let outcome = loop {
            tokio::select! {
                biased;

                request = &mut teardown_rx => match request {
                    Ok(request) => break DriveOutcome::Teardown(request),
                    Err(_) => break DriveOutcome::Orphaned,
                },

                event = events.recv(), if stream_open => match event {
                    Some(event) => {
                        finished_marker |= self.forward(event);
                    }
                    None => {
                        debug!(session = id, "backend result stream closed");
                        stream_open = false;
                    }
                },

                // Children of the runner may keep its output open after it
                // exits, so the exit is watched alongside the stream.
                exit = control.wait() => break DriveOutcome::Exited(exit),
            }
        };

        let report = match outcome {
            DriveOutcome::Exited(exit) => {
                if stream_open {
                    finished_marker |= self.drain_after_exit(&mut events).await;
                }
                self.on_exit(exit, finished_marker)
            }
            DriveOutcome::Teardown(request) => {
                self.on_teardown(request, &mut events, control.as_mut()).await
            }
            DriveOutcome::Orphaned => self.on_orphaned(control.as_mut()).await,
        };

        self.scheduler.sink.session_ended(&report.session);
        // The caller may have dropped its handle.
        let _ = done_tx.send(report);
    }

    /// Forward what the backend still had in flight when it exited, for at
    /// most [`EXIT_DRAIN`]. Returns `true` if the finished marker was among it.
    async fn drain_after_exit(&self, events: &mut mpsc::Receiver<BackendEvent>) -> bool {
        let id = self.session.id;
        let mut finished_marker = false;
        let deadline = tokio::time::sleep(EXIT_DRAIN);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(event) => finished_marker |= self.forward(event),
                    None => break,
                },

                _ = &mut deadline => {
                    warn!(session = id, "backend output still open after exit; dropping the rest");
                    break;
                }
            }
        }
        finished_marker
    }

    /// Deliver one backend event. Returns `true` for the finished marker.
    fn forward(&self, event: BackendEvent) -> bool {
        match event {
            BackendEvent::Result(update) => {
                self.scheduler.sink.update(self.session.id, update);
                false
            }
            BackendEvent::Finished => {
                debug!(session = self.session.id, "backend reported run finished");
                true
            }
        }
    }

    fn on_exit(&self, exit: BackendExit, finished_marker: bool) -> SessionReport {
        let id = self.session.id;
        let (state, error) = if exit.is_success() || finished_marker {
            (SessionState::Completed, None)
        } else {
            error!(session = id, %exit, "test backend crashed");
            (
                SessionState::Failed,
                Some(SchedulerError::BackendCrashed {
                    session: id,
                    exit: exit.to_string(),
                }),
            )
        };

        let session = self
            .scheduler
            .finish_active(id, |s| s.finish(state), None)
            .unwrap_or_else(|| self.detached(|s| s.finish(state)));
        SessionReport { session, error }
    }

    async fn on_teardown(
        &self,
        request: TeardownRequest,
        events: &mut mpsc::Receiver<BackendEvent>,
        control: &mut dyn SessionControl,
    ) -> SessionReport {
        let id = self.session.id;
        let kind = request.kind;

        let confirmed = terminate_within(id, control, self.scheduler.options.cancel_timeout).await;

        // Results the backend produced before it went down are kept.
        while let Ok(event) = events.try_recv() {
            self.forward(event);
        }

        if kind == Teardown::Shutdown {
            if let Err(e) = control.release() {
                warn!(session = id, error = %e, "failed to release session resources");
            }
        }

        let finish = |s: &mut RunSession| {
            s.teardown = Some(kind);
            s.cleanup_confirmed = confirmed;
            s.finish(terminal_state_for(kind));
        };
        let session = self
            .scheduler
            .finish_active(id, finish, Some(kind))
            .unwrap_or_else(|| self.detached(finish));

        info!(session = id, state = %session.state, confirmed, "test session torn down");

        let _ = request.ack.send(TeardownAck {
            session: session.clone(),
            confirmed,
        });

        let error = (!confirmed).then_some(SchedulerError::CancelTimeout { session: id });
        SessionReport { session, error }
    }

    async fn on_orphaned(&self, control: &mut dyn SessionControl) -> SessionReport {
        let id = self.session.id;
        warn!(session = id, "session no longer tracked; stopping backend");
        let confirmed = terminate_within(id, control, self.scheduler.options.cancel_timeout).await;
        if let Err(e) = control.release() {
            warn!(session = id, error = %e, "failed to release session resources");
        }
        let finish = |s: &mut RunSession| {
            s.teardown = Some(Teardown::Cancelled);
            s.cleanup_confirmed = confirmed;
            s.finish(SessionState::Cancelled);
        };
        let session = self
            .scheduler
            .finish_active(id, finish, None)
            .unwrap_or_else(|| self.detached(finish));
        SessionReport {
            session,
            error: None,
        }
    }

    /// Terminal snapshot for a session the scheduler no longer tracks.
    fn detached(&self, f: impl FnOnce(&mut RunSession)) -> RunSession {
        let mut session = self.session.clone();
        f(&mut session);
        session
    }
}

async fn terminate_within(id: SessionId, control: &mut dyn SessionControl, bound: Duration) -> bool {
    match timeout(bound, control.terminate()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(session = id, error = %e, "backend teardown failed");
            false
        }
        Err(_) => {
            warn!(session = id, ?bound, "backend teardown timed out");
            false
        }
    }
}
