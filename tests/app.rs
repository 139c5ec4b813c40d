mod common;

use common::{tmp_dir, ENV_LOCK};
use shellcraft::app::App;
use shellcraft::errors::ErrorKind;
use shellcraft::models::{AuthMode, HistoryRecord};
use shellcraft::services::history::HistoryScope;
use shellcraft::services::registry::NewRemote;
use shellcraft::services::secret::StaticSecretProvider;
use shellcraft::services::settings::Settings;
use std::sync::Arc;

const ENV_KEYS: &[&str] = &[
    "SHELLCRAFT_API_BASE",
    "SHELLCRAFT_API_KEY",
    "OPENAI_API_KEY",
    "SHELLCRAFT_MODEL",
    "SHELLCRAFT_MAX_STEPS",
    "SHELLCRAFT_HISTORY_LIMIT",
    "SHELLCRAFT_COMMAND_TIMEOUT_MS",
    "SHELLCRAFT_BATCH_CONCURRENCY",
    "SHELLCRAFT_AUTO_CONFIRM",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[tokio::test]
async fn config_file_is_read_then_env_wins() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tmp_dir("shellcraft-settings");
    std::fs::write(
        dir.join("config.json"),
        r#"{"model": "from-file", "max_steps": 4, "batch_concurrency": 2}"#,
    )
    .unwrap();
    std::env::set_var("SHELLCRAFT_MAX_STEPS", "6");
    std::env::set_var("OPENAI_API_KEY", "sk-test");
    std::env::set_var("SHELLCRAFT_BATCH_CONCURRENCY", "0");

    let settings = Settings::load_from(&dir).unwrap();
    clear_env();

    assert_eq!(settings.model, "from-file");
    assert_eq!(settings.max_steps, 6);
    assert_eq!(settings.batch_concurrency, 2);
    assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
    assert_eq!(settings.base_dir, dir);
    assert!(!serde_json::to_string(&settings).unwrap().contains("sk-test"));
}

#[tokio::test]
async fn malformed_config_is_a_config_error() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tmp_dir("shellcraft-settings");
    std::fs::write(dir.join("config.json"), "{ \"max_steps\": \"ten\" }").unwrap();
    let err = Settings::load_from(&dir).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
    assert!(err.hint.is_some());
}

#[tokio::test]
async fn removing_a_remote_drops_its_derived_state() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tmp_dir("shellcraft-app");
    let settings = Settings::load_from(&dir).unwrap();
    let app = App::initialize(settings, Arc::new(StaticSecretProvider::empty())).unwrap();

    app.registry
        .add(NewRemote {
            name: "old-box".to_string(),
            host: "192.0.2.10".to_string(),
            user: "root".to_string(),
            port: None,
            auth_mode: AuthMode::Agent,
            key_path: None,
            work_dir: None,
        })
        .unwrap();
    let scope = HistoryScope::Remote("old-box".to_string());
    app.history
        .append(&scope, HistoryRecord::executed("disk", "df -h", 0, "ok"))
        .unwrap();
    assert!(app.paths.remote_dir("old-box").exists());

    let removed = app.remove_remote("old-box").await.unwrap();
    assert_eq!(removed.name, "old-box");
    assert!(!app.registry.contains("old-box"));
    assert!(!app.paths.remote_dir("old-box").exists());
    assert!(app.history.list(&scope).is_empty());
    assert_eq!(
        app.remove_remote("old-box").await.unwrap_err().kind,
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn local_context_includes_history_and_shell_activity() {
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tmp_dir("shellcraft-app");
    let app = App::initialize(
        Settings::load_from(&dir).unwrap(),
        Arc::new(StaticSecretProvider::empty()),
    )
    .unwrap();
    app.history
        .append(
            &HistoryScope::Local,
            HistoryRecord::executed("list files", "ls -la", 0, "total 0"),
        )
        .unwrap();
    app.shell_history
        .append_local(&shellcraft::services::hook::build_record("make test", 2).unwrap())
        .unwrap();

    let (system, history) = app.build_context(None).await;
    assert!(system.contains("OS:"));
    assert!(history.contains("ls -la"));
    assert!(history.contains("$ make test (exit 2)"));
}

#[cfg(unix)]
#[tokio::test]
async fn state_directory_is_created_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let _guard = ENV_LOCK.lock().await;
    clear_env();
    let dir = tmp_dir("shellcraft-app").join("fresh-home");
    let app = App::initialize(
        Settings::load_from(&dir).unwrap(),
        Arc::new(StaticSecretProvider::empty()),
    )
    .unwrap();
    let mode = std::fs::metadata(app.paths.base_dir()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}
