mod common;
use crate::common::builders::items;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;

use tokio::sync::mpsc;

use testrelay::engine::{CommandOutcome, RuntimeEvent, ServiceNotification, UserCommand};
use testrelay::errors::SchedulerError;
use testrelay::host::{parse_host_line, serve_host, HostLine, LineService};
use testrelay::server::{Capability, ServiceListener, wire_capabilities};
use testrelay::types::{RunMode, ServerMode};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn parses_run_and_debug_commands() {
    assert_eq!(
        parse_host_line("run FooTest#adds BarTest"),
        Ok(HostLine::Command(UserCommand::Run {
            targets: items(&["FooTest#adds", "BarTest"]),
            mode: RunMode::Run,
            launch: None,
        }))
    );
    assert_eq!(
        parse_host_line("  debug --launch ci FooTest  "),
        Ok(HostLine::Command(UserCommand::Run {
            targets: items(&["FooTest"]),
            mode: RunMode::Debug,
            launch: Some("ci".to_string()),
        }))
    );
    // Empty target lists are the scheduler's call to reject.
    assert_eq!(
        parse_host_line("run"),
        Ok(HostLine::Command(UserCommand::Run {
            targets: vec![],
            mode: RunMode::Run,
            launch: None,
        }))
    );
    assert!(parse_host_line("run --launch").is_err());
}

#[test]
fn parses_control_commands_and_notifications() {
    assert_eq!(
        parse_host_line("relaunch"),
        Ok(HostLine::Command(UserCommand::Relaunch))
    );
    assert_eq!(
        parse_host_line("cancel"),
        Ok(HostLine::Command(UserCommand::Cancel))
    );
    assert_eq!(
        parse_host_line("report A B"),
        Ok(HostLine::Command(UserCommand::OpenReport {
            items: vec!["A".to_string(), "B".to_string()]
        }))
    );
    assert_eq!(
        parse_host_line("classpath"),
        Ok(HostLine::Notification(ServiceNotification::ClasspathUpdated))
    );
    assert_eq!(
        parse_host_line("import"),
        Ok(HostLine::Notification(ServiceNotification::ProjectsImported))
    );
    assert_eq!(
        parse_host_line("mode light"),
        Ok(HostLine::Notification(ServiceNotification::ServerModeChanged(
            ServerMode::LightWeight
        )))
    );
    assert_eq!(parse_host_line("quit"), Ok(HostLine::Quit));
    assert_eq!(parse_host_line(""), Ok(HostLine::Nothing));
    assert_eq!(parse_host_line("# comment"), Ok(HostLine::Nothing));
}

#[test]
fn rejects_malformed_lines() {
    assert!(parse_host_line("launch FooTest").is_err());
    assert!(parse_host_line("cancel now").is_err());
    assert!(parse_host_line("mode").is_err());
    assert!(parse_host_line("mode turbo").is_err());
}

#[tokio::test]
async fn serves_lines_until_quit() -> TestResult {
    init_tracing();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let service = LineService::new(ServerMode::Standard, &[Capability::Classpath]);
    wire_capabilities(&service, &ServiceListener::new(events_tx.clone()));

    // Stand-in runtime: answers every command with Busy.
    let runtime = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = events_rx.recv().await {
            match event {
                RuntimeEvent::Command { command, reply } => {
                    seen.push(format!("{command:?}"));
                    if let Some(reply) = reply {
                        let _ = reply.send(CommandOutcome::Rejected(SchedulerError::Busy {
                            active: 7,
                        }));
                    }
                }
                RuntimeEvent::Service(n) => seen.push(format!("{n:?}")),
                RuntimeEvent::ShutdownRequested => {
                    seen.push("shutdown".to_string());
                    break;
                }
                _ => {}
            }
        }
        seen
    });

    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    for line in ["run T1", "classpath", "import", "bogus", "", "quit", "run never"] {
        lines_tx.send(line.to_string())?;
    }

    let mut out = Vec::new();
    with_timeout(serve_host(lines_rx, &mut out, &service, events_tx)).await?;

    let written = String::from_utf8(out)?;
    let replies: Vec<&str> = written.lines().collect();
    assert_eq!(replies.len(), 4);
    assert!(replies[0].starts_with("error") && replies[0].contains('7'));
    assert_eq!(replies[1], "ok");
    assert!(replies[2].starts_with("error capability not offered"));
    assert!(replies[3].contains("unknown command 'bogus'"));

    let seen = with_timeout(runtime).await?;
    assert_eq!(seen.len(), 3);
    assert!(seen[0].starts_with("Run"));
    assert_eq!(seen[1], "ClasspathUpdated");
    assert_eq!(seen[2], "shutdown");
    Ok(())
}
