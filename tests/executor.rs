#![cfg(unix)]

mod common;

use common::{logger, settings_in, tmp_dir};
use shellcraft::errors::ErrorKind;
use shellcraft::managers::connection::ConnectionManager;
use shellcraft::managers::executor::{CommandRunner, RunOptions, StepExecutor};
use shellcraft::managers::process::{OutputChunk, OutputObserver, StreamKind};
use shellcraft::services::secret::StaticSecretProvider;
use shellcraft::services::settings::Settings;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn executor(settings: &Settings) -> StepExecutor {
    let connections = Arc::new(ConnectionManager::new(
        logger(),
        settings,
        Arc::new(StaticSecretProvider::empty()),
    ));
    StepExecutor::new(logger(), settings, connections)
}

#[tokio::test]
async fn local_commands_report_exit_code_and_output() {
    let settings = settings_in(&tmp_dir("shellcraft-exec"));
    let exec = executor(&settings);

    let ok = exec.run("echo hello", None, RunOptions::default()).await.unwrap();
    assert_eq!(ok.exit_code, 0);
    assert_eq!(ok.output, "hello");
    assert!(ok.succeeded());

    let failed = exec
        .run("echo oops >&2; exit 3", None, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(failed.exit_code, 3);
    assert_eq!(failed.output, "oops");
    assert!(!failed.succeeded());
}

#[tokio::test]
async fn slow_commands_are_killed_at_the_deadline() {
    let mut settings = settings_in(&tmp_dir("shellcraft-exec"));
    settings.command_timeout_ms = 200;
    let exec = executor(&settings);

    let started = std::time::Instant::now();
    let outcome = exec.run("sleep 5", None, RunOptions::default()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(outcome.exit_code, 124);
    assert!(outcome.timed_out);
    assert!(outcome.output.contains("[timed out after 200 ms]"));
}

#[tokio::test]
async fn per_call_timeout_overrides_the_default() {
    let settings = settings_in(&tmp_dir("shellcraft-exec"));
    let exec = executor(&settings);
    let outcome = exec
        .run(
            "sleep 5",
            None,
            RunOptions::with_timeout(Duration::from_millis(150)),
        )
        .await
        .unwrap();
    assert_eq!(outcome.exit_code, 124);
}

#[tokio::test]
async fn output_is_streamed_to_the_observer() {
    let settings = settings_in(&tmp_dir("shellcraft-exec"));
    let exec = executor(&settings);
    let seen: Arc<Mutex<Vec<(StreamKind, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer: OutputObserver = Arc::new(move |chunk: &OutputChunk| {
        sink.lock().unwrap().push((chunk.stream, chunk.text.clone()));
    });

    let outcome = exec
        .run(
            "echo out; echo err >&2",
            None,
            RunOptions::default().observer(observer),
        )
        .await
        .unwrap();
    assert_eq!(outcome.exit_code, 0);

    let seen = seen.lock().unwrap();
    let stdout: String = seen
        .iter()
        .filter(|(stream, _)| *stream == StreamKind::Stdout)
        .map(|(_, text)| text.as_str())
        .collect();
    let stderr: String = seen
        .iter()
        .filter(|(stream, _)| *stream == StreamKind::Stderr)
        .map(|(_, text)| text.as_str())
        .collect();
    assert_eq!(stdout, "out\n");
    assert_eq!(stderr, "err\n");
}

#[tokio::test]
async fn missing_shell_is_a_dependency_error() {
    let mut settings = settings_in(&tmp_dir("shellcraft-exec"));
    settings.shell_program = "/nonexistent/shellcraft-sh".to_string();
    let exec = executor(&settings);
    let err = exec
        .run("true", None, RunOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingDependency);
}
