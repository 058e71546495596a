use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot, Notify};
use testrelay::exec::{
    BackendEvent, BackendExit, BoxFuture, ExecutionBackend, LaunchedSession, SessionControl,
};
use testrelay::run::{ResultUpdate, RunRequest, SessionId};

/// What `terminate` does on a scripted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminateBehaviour {
    /// Acknowledge immediately.
    #[default]
    Confirm,
    /// Never resolve.
    Hang,
    /// Resolve with an error.
    Fail,
}

#[derive(Default)]
struct Shared {
    launches: Vec<(SessionId, RunRequest)>,
    fail_next: Option<String>,
    gate: Option<Arc<Notify>>,
    terminate: TerminateBehaviour,
    sessions: BTreeMap<SessionId, ScriptedSession>,
    terminated: BTreeSet<SessionId>,
    released: BTreeSet<SessionId>,
}

/// A backend that never spawns anything. Tests drive each launched session
/// by hand through its [`ScriptedSession`].
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next launch fails with `cause`.
    pub fn fail_next_launch(&self, cause: &str) {
        self.shared.lock().unwrap().fail_next = Some(cause.to_string());
    }

    /// Every launch waits for a `notify_one` on the returned gate.
    pub fn gate_launches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.shared.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    pub fn set_terminate(&self, behaviour: TerminateBehaviour) {
        self.shared.lock().unwrap().terminate = behaviour;
    }

    /// Launch attempts, failed ones included.
    pub fn launch_count(&self) -> usize {
        self.shared.lock().unwrap().launches.len()
    }

    pub fn launched_requests(&self) -> Vec<RunRequest> {
        self.shared
            .lock()
            .unwrap()
            .launches
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn session(&self, id: SessionId) -> ScriptedSession {
        self.shared
            .lock()
            .unwrap()
            .sessions
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("no scripted session {id}"))
    }

    pub fn was_terminated(&self, id: SessionId) -> bool {
        self.shared.lock().unwrap().terminated.contains(&id)
    }

    pub fn was_released(&self, id: SessionId) -> bool {
        self.shared.lock().unwrap().released.contains(&id)
    }

    fn launch_now(&self, session: SessionId, request: &RunRequest) -> anyhow::Result<LaunchedSession> {
        let mut shared = self.shared.lock().unwrap();
        shared.launches.push((session, request.clone()));
        if let Some(cause) = shared.fail_next.take() {
            return Err(anyhow!(cause));
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        shared.sessions.insert(
            session,
            ScriptedSession {
                id: session,
                events: Arc::new(Mutex::new(Some(events_tx))),
                exit: Arc::new(Mutex::new(Some(exit_tx))),
            },
        );

        Ok(LaunchedSession {
            events: events_rx,
            control: Box::new(ScriptedControl {
                id: session,
                exit_rx,
                exited: None,
                shared: self.shared.clone(),
            }),
        })
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn launch<'a>(
        &'a self,
        session: SessionId,
        request: &'a RunRequest,
    ) -> BoxFuture<'a, anyhow::Result<LaunchedSession>> {
        let gate = self.shared.lock().unwrap().gate.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.launch_now(session, request)
        })
    }
}

/// Test-side handle on one launched session.
#[derive(Clone)]
pub struct ScriptedSession {
    pub id: SessionId,
    events: Arc<Mutex<Option<mpsc::Sender<BackendEvent>>>>,
    exit: Arc<Mutex<Option<oneshot::Sender<BackendExit>>>>,
}

impl ScriptedSession {
    pub async fn report(&self, update: ResultUpdate) {
        self.send(BackendEvent::Result(update)).await;
    }

    pub async fn send(&self, event: BackendEvent) {
        let tx = self.events.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// End the result stream and let the backend exit with `exit`.
    pub fn exit(&self, exit: BackendExit) {
        self.close_stream();
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(exit);
        }
    }

    /// Report the finished marker and exit cleanly.
    pub async fn finish(&self) {
        self.send(BackendEvent::Finished).await;
        self.exit(BackendExit::Success);
    }

    fn close_stream(&self) {
        self.events.lock().unwrap().take();
    }
}

struct ScriptedControl {
    id: SessionId,
    exit_rx: oneshot::Receiver<BackendExit>,
    exited: Option<BackendExit>,
    shared: Arc<Mutex<Shared>>,
}

impl SessionControl for ScriptedControl {
    fn wait(&mut self) -> BoxFuture<'_, BackendExit> {
        Box::pin(async move {
            if let Some(exit) = &self.exited {
                return exit.clone();
            }
            let exit = (&mut self.exit_rx)
                .await
                .unwrap_or_else(|_| BackendExit::Abnormal("script dropped".to_string()));
            self.exited = Some(exit.clone());
            exit
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        let mut shared = self.shared.lock().unwrap();
        match shared.terminate {
            TerminateBehaviour::Confirm => {
                shared.terminated.insert(self.id);
                if let Some(session) = shared.sessions.get(&self.id) {
                    session.close_stream();
                }
                Box::pin(std::future::ready(anyhow::Ok(())))
            }
            TerminateBehaviour::Hang => Box::pin(std::future::pending::<anyhow::Result<()>>()),
            TerminateBehaviour::Fail => {
                let err: anyhow::Result<()> = Err(anyhow!("scripted terminate failure"));
                Box::pin(std::future::ready(err))
            }
        }
    }

    fn release(&mut self) -> anyhow::Result<()> {
        self.shared.lock().unwrap().released.insert(self.id);
        Ok(())
    }
}
