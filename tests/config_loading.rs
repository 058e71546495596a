mod common;
use crate::common::builders::ConfigFileBuilder;

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use testrelay::config::{load_and_validate, load_from_path, ConfigFile, DEFAULT_DEBOUNCE_MS};
use testrelay::errors::TestRelayError;
use testrelay::server::Capability;
use testrelay::types::{BusyBehaviour, ServerMode};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str) -> String {
    match load_and_validate(write_config(contents).path()) {
        Err(TestRelayError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn minimal_config_uses_defaults() {
    let file = write_config(
        r#"
[runner]
program = "java"
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.scheduler.busy_behaviour, BusyBehaviour::Reject);
    assert_eq!(cfg.scheduler.cancel_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.watch.debounce_ms, DEFAULT_DEBOUNCE_MS);
    assert_eq!(cfg.service.initial_mode, ServerMode::Unknown);
    assert_eq!(
        cfg.service.capabilities,
        vec![
            Capability::Classpath,
            Capability::ServerMode,
            Capability::ProjectImport
        ]
    );
    assert!(cfg.launch.is_empty());
}

#[test]
fn full_config_round_trips_every_section() {
    let file = write_config(
        r#"
[scheduler]
busy_behaviour = "queue"
cancel_timeout_ms = 1500

[watch]
debounce_ms = 200
roots = ["src"]
patterns = ["test/**/*.java"]
light_weight_patterns = ["test/**/*IT.java"]
exclude = ["**/generated/**"]

[service]
initial_mode = "light"
capabilities = ["classpath", "server_mode"]

[runner]
program = "java"
args = ["-jar", "runner.jar"]
env = { JAVA_TOOL_OPTIONS = "-Xmx1g" }
args_file = true
debug_args = ["-agentlib:jdwp=transport=dt_socket,server=y,address=5005"]
attach = ["jdb", "-attach", "5005"]

[launch.ci]
args = ["--fail-fast"]
env = { CI = "1" }
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.scheduler.busy_behaviour, BusyBehaviour::Queue);
    assert_eq!(cfg.scheduler.cancel_timeout(), Duration::from_millis(1500));
    assert_eq!(cfg.watch.debounce(), Duration::from_millis(200));
    assert_eq!(cfg.service.initial_mode, ServerMode::LightWeight);
    assert_eq!(
        cfg.service.capabilities,
        vec![Capability::Classpath, Capability::ServerMode]
    );
    assert!(cfg.runner.args_file);
    assert_eq!(cfg.runner.attach.len(), 3);

    let ci = cfg.launch_configuration("ci").unwrap();
    assert_eq!(ci.name, "ci");
    assert_eq!(ci.args, vec!["--fail-fast".to_string()]);
    assert_eq!(ci.env.get("CI").map(String::as_str), Some("1"));
    assert!(cfg.launch_configuration("nightly").is_none());
    assert_eq!(cfg.launch_configurations().len(), 1);
}

#[test]
fn missing_runner_section_is_a_toml_error() {
    let file = write_config(
        r#"
[watch]
patterns = ["**/*.java"]
"#,
    );
    match load_and_validate(file.path()) {
        Err(TestRelayError::TomlError(_)) => {}
        other => panic!("Expected TomlError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn unknown_busy_behaviour_is_a_toml_error() {
    let file = write_config(
        r#"
[scheduler]
busy_behaviour = "drop"

[runner]
program = "java"
"#,
    );
    assert!(matches!(
        load_from_path(file.path()),
        Err(TestRelayError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(result, Err(TestRelayError::IoError(_))));
}

#[test]
fn empty_program_is_rejected() {
    let msg = expect_config_error(
        r#"
[runner]
program = "  "
"#,
    );
    assert!(msg.contains("[runner].program"));
}

#[test]
fn zero_debounce_is_rejected() {
    let msg = expect_config_error(
        r#"
[watch]
debounce_ms = 0

[runner]
program = "java"
"#,
    );
    assert!(msg.contains("debounce_ms"));
}

#[test]
fn zero_cancel_timeout_is_rejected() {
    let msg = expect_config_error(
        r#"
[scheduler]
cancel_timeout_ms = 0

[runner]
program = "java"
"#,
    );
    assert!(msg.contains("cancel_timeout_ms"));
}

#[test]
fn invalid_glob_is_rejected() {
    let msg = expect_config_error(
        r#"
[watch]
patterns = ["src/**/[*.java"]

[runner]
program = "java"
"#,
    );
    assert!(msg.contains("invalid glob pattern"));
}

#[test]
fn empty_attach_argument_is_rejected() {
    let msg = expect_config_error(
        r#"
[runner]
program = "java"
attach = ["jdb", ""]
"#,
    );
    assert!(msg.contains("attach"));
}

#[test]
fn launch_names_with_whitespace_are_rejected() {
    let raw = ConfigFileBuilder::new("java")
        .with_launch("my launch", &[], &[])
        .build_raw();
    match ConfigFile::try_from(raw) {
        Err(TestRelayError::ConfigError(msg)) => assert!(msg.contains("my launch")),
        other => panic!("Expected ConfigError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn builder_produces_valid_config() {
    let cfg = ConfigFileBuilder::new("java")
        .with_busy_behaviour(BusyBehaviour::Queue)
        .with_pattern("src/test/**/*.java")
        .with_exclude("**/target/**")
        .with_launch("ci", &["--ci"], &[("CI", "1")])
        .build();
    assert_eq!(cfg.watch.patterns.len(), 1);
    assert_eq!(cfg.launch_configurations()["ci"].args, vec!["--ci".to_string()]);
}
