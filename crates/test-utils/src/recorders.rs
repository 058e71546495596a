use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use testrelay::present::{Presenter, RefreshScope, ReportOpener};
use testrelay::run::{ResultUpdate, RunSession, SessionId, SessionState, TestResultSink};
use testrelay::types::ServerMode;
use testrelay::watch::{FileListener, ListenerFactory, ListenerSet};

/// Everything a [`RecordingSink`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Started(SessionId),
    Update(SessionId, ResultUpdate),
    Ended(SessionId, SessionState),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn updates_for(&self, session: SessionId) -> Vec<ResultUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Update(id, update) if id == session => Some(update),
                _ => None,
            })
            .collect()
    }
}

impl TestResultSink for RecordingSink {
    fn session_started(&self, session: &RunSession) {
        self.events.lock().unwrap().push(SinkEvent::Started(session.id));
    }

    fn update(&self, session: SessionId, update: ResultUpdate) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Update(session, update));
    }

    fn session_ended(&self, session: &RunSession) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Ended(session.id, session.state));
    }
}

#[derive(Debug, Default)]
pub struct RecordingPresenter {
    scopes: Mutex<Vec<RefreshScope>>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scopes(&self) -> Vec<RefreshScope> {
        self.scopes.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn refresh(&self, scope: RefreshScope) {
        self.scopes.lock().unwrap().push(scope);
    }
}

#[derive(Debug, Default)]
pub struct RecordingReport {
    opened: Mutex<Vec<Vec<ResultUpdate>>>,
}

impl RecordingReport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<Vec<ResultUpdate>> {
        self.opened.lock().unwrap().clone()
    }
}

impl ReportOpener for RecordingReport {
    fn open(&self, results: &[ResultUpdate]) {
        self.opened.lock().unwrap().push(results.to_vec());
    }
}

/// Listener that keeps a shared live count while it exists.
struct CountingListener {
    live: Arc<AtomicUsize>,
}

impl FileListener for CountingListener {}

impl Drop for CountingListener {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory binding `per_bind` counting listeners per call and recording
/// the mode of every bind.
#[derive(Debug)]
pub struct CountingListenerFactory {
    per_bind: usize,
    live: Arc<AtomicUsize>,
    binds: Mutex<Vec<ServerMode>>,
    fail: Mutex<bool>,
}

impl CountingListenerFactory {
    pub fn new(per_bind: usize) -> Arc<Self> {
        Arc::new(Self {
            per_bind,
            live: Arc::new(AtomicUsize::new(0)),
            binds: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        })
    }

    /// Listeners created and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> Vec<ServerMode> {
        self.binds.lock().unwrap().clone()
    }

    pub fn fail_binds(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl ListenerFactory for CountingListenerFactory {
    fn bind(&self, mode: ServerMode) -> anyhow::Result<ListenerSet> {
        self.binds.lock().unwrap().push(mode);
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("scripted bind failure"));
        }
        let listeners = (0..self.per_bind)
            .map(|_| {
                self.live.fetch_add(1, Ordering::SeqCst);
                Box::new(CountingListener {
                    live: self.live.clone(),
                }) as Box<dyn FileListener>
            })
            .collect();
        Ok(ListenerSet::new(mode, listeners))
    }
}
