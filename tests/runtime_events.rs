mod common;
use crate::common::builders::items;
use crate::common::recorders::{CountingListenerFactory, RecordingPresenter, RecordingReport};
use crate::common::scripted_backend::ScriptedBackend;
use crate::common::{eventually, init_tracing, with_timeout};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use testrelay::engine::{
    CommandOutcome, FileChangeKind, Runtime, RuntimeComponents, RuntimeEvent, RuntimeOptions,
    ServiceNotification, UserCommand,
};
use testrelay::errors::SchedulerError;
use testrelay::present::RefreshScope;
use testrelay::run::{
    LaunchConfiguration, ResultStore, ResultUpdate, RunnerScheduler, SchedulerOptions, TestStatus,
};
use testrelay::server::ServerModeTracker;
use testrelay::types::{BusyBehaviour, RunMode, ServerMode};
use testrelay::watch::DebouncedWatcherRegistry;

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    backend: ScriptedBackend,
    factory: Arc<CountingListenerFactory>,
    presenter: Arc<RecordingPresenter>,
    report: Arc<RecordingReport>,
    results: Arc<ResultStore>,
    scheduler: RunnerScheduler,
    registry: DebouncedWatcherRegistry,
    tracker: Arc<ServerModeTracker>,
    runtime: JoinHandle<testrelay::errors::Result<()>>,
}

impl Harness {
    fn start(options: RuntimeOptions, mode: ServerMode) -> Self {
        init_tracing();
        let backend = ScriptedBackend::new();
        let factory = CountingListenerFactory::new(1);
        let presenter = RecordingPresenter::new();
        let report = RecordingReport::new();
        let results = Arc::new(ResultStore::new());
        let tracker = Arc::new(ServerModeTracker::new(mode));
        let registry = DebouncedWatcherRegistry::new(
            factory.clone(),
            tracker.clone(),
            Duration::from_millis(500),
        );
        let scheduler = RunnerScheduler::new(
            Arc::new(backend.clone()),
            results.clone(),
            SchedulerOptions {
                cancel_timeout: Duration::from_millis(500),
            },
        );

        let mut launches = BTreeMap::new();
        launches.insert(
            "ci".to_string(),
            LaunchConfiguration {
                name: "ci".to_string(),
                args: vec!["--ci".to_string()],
                env: BTreeMap::new(),
            },
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let components = RuntimeComponents {
            scheduler: scheduler.clone(),
            registry: registry.clone(),
            tracker: tracker.clone(),
            results: results.clone(),
            presenter: presenter.clone(),
            report: report.clone(),
            launches,
        };
        let runtime = tokio::spawn(Runtime::new(components, rx, tx.clone(), options).run());

        Self {
            tx,
            backend,
            factory,
            presenter,
            report,
            results,
            scheduler,
            registry,
            tracker,
            runtime,
        }
    }

    async fn command(&self, command: UserCommand) -> CommandOutcome {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RuntimeEvent::Command {
                command,
                reply: Some(reply),
            })
            .expect("runtime alive");
        with_timeout(rx).await.expect("runtime replied")
    }

    async fn run(&self, ids: &[&str]) -> CommandOutcome {
        self.command(UserCommand::Run {
            targets: items(ids),
            mode: RunMode::Run,
            launch: None,
        })
        .await
    }

    fn notify(&self, notification: ServiceNotification) {
        self.tx
            .send(RuntimeEvent::Service(notification))
            .expect("runtime alive");
    }

    async fn shutdown(self) -> TestResult {
        let _ = self.tx.send(RuntimeEvent::ShutdownRequested);
        with_timeout(self.runtime).await??;
        Ok(())
    }
}

fn started(outcome: &CommandOutcome) -> u64 {
    match outcome {
        CommandOutcome::Started(id) => *id,
        other => panic!("expected Started, got {other:?}"),
    }
}

#[tokio::test]
async fn startup_binds_listeners_for_the_initial_mode() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Hybrid);

    eventually(|| h.registry.bind_count() == 1).await;
    assert_eq!(h.factory.binds(), vec![ServerMode::Hybrid]);
    h.shutdown().await
}

#[tokio::test]
async fn finished_session_refreshes_its_items() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    let id = started(&h.run(&["T1", "T2"]).await);
    let session = h.backend.session(id);
    session.report(ResultUpdate::new("T1", TestStatus::Passed)).await;
    session.report(ResultUpdate::new("T2", TestStatus::Failed)).await;
    session.finish().await;

    eventually(|| h.presenter.scopes().contains(&RefreshScope::Item("T2".to_string()))).await;
    assert!(h.presenter.scopes().contains(&RefreshScope::Item("T1".to_string())));
    assert_eq!(h.results.snapshot().len(), 2);
    h.shutdown().await
}

#[tokio::test]
async fn busy_requests_are_rejected_by_default() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    let first = started(&h.run(&["T1"]).await);
    let second = h.run(&["T2"]).await;

    assert_eq!(second, CommandOutcome::Rejected(SchedulerError::Busy { active: first }));
    assert_eq!(h.backend.launch_count(), 1);
    h.shutdown().await
}

#[tokio::test]
async fn queued_requests_start_in_arrival_order() -> TestResult {
    let options = RuntimeOptions {
        busy_behaviour: BusyBehaviour::Queue,
        ..RuntimeOptions::default()
    };
    let h = Harness::start(options, ServerMode::Standard);

    let first = started(&h.run(&["A"]).await);
    assert_eq!(h.run(&["B"]).await, CommandOutcome::Queued { position: 1 });
    assert_eq!(h.run(&["C"]).await, CommandOutcome::Queued { position: 2 });

    h.backend.session(first).finish().await;
    eventually(|| h.backend.launch_count() == 2).await;
    let second = h.scheduler.active_session().expect("B started").id;
    h.backend.session(second).finish().await;
    eventually(|| h.backend.launch_count() == 3).await;

    let order: Vec<Vec<String>> = h
        .backend
        .launched_requests()
        .iter()
        .map(|r| r.target_ids().iter().map(|s| s.to_string()).collect())
        .collect();
    assert_eq!(order, vec![vec!["A"], vec!["B"], vec!["C"]]);
    h.shutdown().await
}

#[tokio::test]
async fn cancel_supersedes_queued_requests() -> TestResult {
    let options = RuntimeOptions {
        busy_behaviour: BusyBehaviour::Queue,
        ..RuntimeOptions::default()
    };
    let h = Harness::start(options, ServerMode::Standard);

    let first = started(&h.run(&["A"]).await);
    h.run(&["B"]).await;
    h.run(&["C"]).await;

    let outcome = h.command(UserCommand::Cancel).await;
    assert_eq!(
        outcome,
        CommandOutcome::Cancelled {
            session: Some(first),
            superseded: 2
        }
    );
    assert!(h.backend.was_terminated(first));

    // Give the session-ended event a chance to run the (now empty) queue.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.backend.launch_count(), 1);
    assert!(h.scheduler.is_idle());
    h.shutdown().await
}

#[tokio::test]
async fn cancel_with_nothing_running() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    let outcome = h.command(UserCommand::Cancel).await;
    assert_eq!(
        outcome,
        CommandOutcome::Cancelled {
            session: None,
            superseded: 0
        }
    );
    h.shutdown().await
}

#[tokio::test]
async fn named_launch_configuration_is_forwarded() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    let outcome = h
        .command(UserCommand::Run {
            targets: items(&["T"]),
            mode: RunMode::Debug,
            launch: Some("ci".to_string()),
        })
        .await;
    started(&outcome);

    let launched = h.backend.launched_requests();
    let launch = launched[0].launch.as_ref().expect("launch configuration");
    assert_eq!(launch.name, "ci");
    assert_eq!(launch.args, vec!["--ci".to_string()]);
    assert_eq!(launched[0].mode, RunMode::Debug);
    h.shutdown().await
}

#[tokio::test]
async fn unknown_launch_configuration_is_rejected() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    let outcome = h
        .command(UserCommand::Run {
            targets: items(&["T"]),
            mode: RunMode::Run,
            launch: Some("nightly".to_string()),
        })
        .await;
    match outcome {
        CommandOutcome::Rejected(SchedulerError::InvalidRequest(msg)) => {
            assert!(msg.contains("nightly"))
        }
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
    assert_eq!(h.backend.launch_count(), 0);
    h.shutdown().await
}

#[tokio::test]
async fn relaunch_through_the_runtime() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    assert_eq!(
        h.command(UserCommand::Relaunch).await,
        CommandOutcome::Rejected(SchedulerError::NoPriorRequest)
    );

    let id = started(&h.run(&["T"]).await);
    h.backend.session(id).finish().await;
    eventually(|| h.scheduler.last_completed_request().is_some()).await;

    let again = started(&h.command(UserCommand::Relaunch).await);
    assert!(again > id);
    assert_eq!(h.backend.launch_count(), 2);
    h.shutdown().await
}

#[tokio::test]
async fn queued_relaunch_waits_behind_pending_requests() -> TestResult {
    let options = RuntimeOptions {
        busy_behaviour: BusyBehaviour::Queue,
        ..RuntimeOptions::default()
    };
    let h = Harness::start(options, ServerMode::Standard);

    let warmup = started(&h.run(&["X"]).await);
    h.backend.session(warmup).finish().await;
    eventually(|| h.scheduler.last_completed_request().is_some()).await;

    let a = started(&h.run(&["A"]).await);
    assert_eq!(h.run(&["B"]).await, CommandOutcome::Queued { position: 1 });

    // Relaunch as soon as A has ended, before its completion reaches the
    // runtime loop.
    h.backend.session(a).finish().await;
    with_timeout(h.scheduler.wait_until_idle()).await;
    let outcome = h.command(UserCommand::Relaunch).await;
    assert!(
        matches!(outcome, CommandOutcome::Queued { .. }),
        "relaunch must not jump the queue: {outcome:?}"
    );

    eventually(|| h.backend.launch_count() == 3).await;
    let b = h.scheduler.active_session().expect("B started").id;
    h.backend.session(b).finish().await;
    eventually(|| h.backend.launch_count() == 4).await;

    let order: Vec<Vec<String>> = h
        .backend
        .launched_requests()
        .iter()
        .map(|r| r.target_ids().iter().map(|s| s.to_string()).collect())
        .collect();
    assert_eq!(order, vec![vec!["X"], vec!["A"], vec!["B"], vec!["A"]]);
    h.shutdown().await
}

#[tokio::test]
async fn report_contains_requested_results() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);

    let id = started(&h.run(&["T1", "T2"]).await);
    let session = h.backend.session(id);
    session.report(ResultUpdate::new("T1", TestStatus::Passed)).await;
    session.report(ResultUpdate::new("T2", TestStatus::Skipped)).await;
    session.finish().await;
    eventually(|| h.scheduler.is_idle()).await;

    assert_eq!(
        h.command(UserCommand::OpenReport { items: vec![] }).await,
        CommandOutcome::ReportOpened { results: 2 }
    );
    assert_eq!(
        h.command(UserCommand::OpenReport {
            items: vec!["T2".to_string(), "missing".to_string()]
        })
        .await,
        CommandOutcome::ReportOpened { results: 1 }
    );

    let opened = h.report.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1][0].item, "T2");
    h.shutdown().await
}

#[tokio::test]
async fn mode_change_refreshes_and_rebinds_immediately() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::LightWeight);
    eventually(|| h.registry.bind_count() == 1).await;

    h.notify(ServiceNotification::ServerModeChanged(ServerMode::Standard));
    eventually(|| h.registry.bind_count() == 2).await;

    assert_eq!(h.tracker.get(), ServerMode::Standard);
    assert_eq!(h.registry.active_mode(), Some(ServerMode::Standard));
    assert!(h.presenter.scopes().contains(&RefreshScope::All));
    assert_eq!(h.factory.live(), 1);

    // Same mode again: nothing to do.
    h.notify(ServiceNotification::ServerModeChanged(ServerMode::Standard));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.registry.bind_count(), 2);
    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn classpath_and_import_notifications_rebind_after_debounce() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);
    eventually(|| h.registry.bind_count() == 1).await;

    h.notify(ServiceNotification::ClasspathUpdated);
    h.notify(ServiceNotification::ProjectsImported);
    h.notify(ServiceNotification::ClasspathUpdated);
    eventually(|| h.registry.has_pending_rebind()).await;
    assert_eq!(h.registry.bind_count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.registry.bind_count(), 2);
    assert!(h.presenter.scopes().is_empty(), "classpath updates do not refresh views");
    h.shutdown().await
}

#[tokio::test]
async fn file_changes_refresh_only_on_content_change() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("FooTest.java");
    std::fs::write(&path, "class FooTest {}")?;

    let changed = |kind| RuntimeEvent::FileChanged {
        path: path.clone(),
        kind,
    };
    let file_refreshes = |p: &RecordingPresenter| {
        p.scopes()
            .iter()
            .filter(|s| matches!(s, RefreshScope::File(_)))
            .count()
    };

    h.tx.send(changed(FileChangeKind::Created))?;
    eventually(|| file_refreshes(h.presenter.as_ref()) == 1).await;

    // Same bytes: no refresh.
    h.tx.send(changed(FileChangeKind::Modified))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(file_refreshes(h.presenter.as_ref()), 1);

    std::fs::write(&path, "class FooTest { void adds() {} }")?;
    h.tx.send(changed(FileChangeKind::Modified))?;
    eventually(|| file_refreshes(h.presenter.as_ref()) == 2).await;

    std::fs::remove_file(&path)?;
    h.tx.send(changed(FileChangeKind::Removed))?;
    eventually(|| file_refreshes(h.presenter.as_ref()) == 3).await;
    h.shutdown().await
}

#[tokio::test]
async fn shutdown_tears_down_the_active_session() -> TestResult {
    let h = Harness::start(RuntimeOptions::default(), ServerMode::Standard);
    eventually(|| h.factory.live() == 1).await;

    let id = started(&h.run(&["T"]).await);
    let backend = h.backend.clone();
    let factory = h.factory.clone();
    let scheduler = h.scheduler.clone();
    h.shutdown().await?;

    assert!(backend.was_terminated(id));
    assert!(backend.was_released(id));
    assert_eq!(factory.live(), 0);
    assert_eq!(
        scheduler.status(),
        testrelay::run::SchedulerStatus::ShuttingDown
    );
    Ok(())
}

#[tokio::test]
async fn exit_when_idle_stops_after_the_last_session() -> TestResult {
    let options = RuntimeOptions {
        exit_when_idle: true,
        watch: false,
        ..RuntimeOptions::default()
    };
    let h = Harness::start(options, ServerMode::Standard);

    let id = started(&h.run(&["T"]).await);
    h.backend.session(id).finish().await;

    with_timeout(h.runtime).await??;
    assert_eq!(h.factory.live(), 0);
    assert_eq!(h.factory.binds(), Vec::<ServerMode>::new());
    Ok(())
}

#[tokio::test]
async fn exit_when_idle_stops_after_a_failed_launch() -> TestResult {
    let options = RuntimeOptions {
        exit_when_idle: true,
        watch: false,
        ..RuntimeOptions::default()
    };
    let h = Harness::start(options, ServerMode::Standard);
    h.backend.fail_next_launch("no such runner");

    match h.run(&["T"]).await {
        CommandOutcome::Rejected(SchedulerError::LaunchFailed { .. }) => {}
        other => panic!("expected LaunchFailed, got {other:?}"),
    }
    with_timeout(h.runtime).await??;
    Ok(())
}
