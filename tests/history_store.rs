mod common;

use common::{logger, tmp_dir};
use shellcraft::models::{HistoryRecord, ShellHistoryItem};
use shellcraft::services::history::{HistoryScope, HistoryStore};
use shellcraft::services::shell_history::ShellHistoryStore;
use shellcraft::utils::paths::StoragePaths;

fn prompts(records: &[HistoryRecord]) -> Vec<String> {
    records.iter().map(|r| r.user_prompt.clone()).collect()
}

#[test]
fn retention_drops_oldest_first() {
    let dir = tmp_dir("shellcraft-history");
    let store = HistoryStore::new(logger(), StoragePaths::new(&dir), 2);
    let scope = HistoryScope::Local;
    for prompt in ["A", "B", "C"] {
        store
            .append(&scope, HistoryRecord::executed(prompt, "true", 0, ""))
            .expect("append");
    }
    assert_eq!(prompts(&store.list(&scope)), vec!["B", "C"]);
}

#[test]
fn scopes_are_kept_apart() {
    let dir = tmp_dir("shellcraft-history");
    let store = HistoryStore::new(logger(), StoragePaths::new(&dir), 10);
    store
        .append(&HistoryScope::Local, HistoryRecord::executed("local", "ls", 0, ""))
        .unwrap();
    store
        .append(
            &HistoryScope::Remote("web".to_string()),
            HistoryRecord::executed("remote", "uptime", 0, ""),
        )
        .unwrap();
    assert_eq!(prompts(&store.list(&HistoryScope::Local)), vec!["local"]);
    assert_eq!(
        prompts(&store.list(&HistoryScope::Remote("web".to_string()))),
        vec!["remote"]
    );
    assert!(dir.join("remotes").join("web").join("history.json").exists());
}

#[test]
fn invalid_entries_are_skipped_in_order() {
    let dir = tmp_dir("shellcraft-history");
    let paths = StoragePaths::new(&dir);
    let valid = |p: &str| serde_json::to_string(&HistoryRecord::executed(p, "ls", 0, "")).unwrap();
    let body = format!(
        "[\n{},\n{{\"unexpected\": true}},\n{},\n\"not a record\",\n{}\n]\n",
        valid("one"),
        valid("two"),
        valid("three")
    );
    std::fs::write(paths.local_history_path(), body).unwrap();

    let store = HistoryStore::new(logger(), paths, 10);
    assert_eq!(
        prompts(&store.list(&HistoryScope::Local)),
        vec!["one", "two", "three"]
    );
}

#[test]
fn garbled_lines_degrade_to_fewer_records() {
    let dir = tmp_dir("shellcraft-history");
    let paths = StoragePaths::new(&dir);
    let valid = |p: &str| serde_json::to_string(&HistoryRecord::executed(p, "ls", 0, "")).unwrap();
    let body = format!(
        "[\n{},\n@@garbage@@,\n{},\n{{\"user_prompt\": \"cut",
        valid("one"),
        valid("two")
    );
    std::fs::write(paths.local_history_path(), body).unwrap();

    let store = HistoryStore::new(logger(), paths, 10);
    let records = store.list(&HistoryScope::Local);
    assert_eq!(prompts(&records), vec!["one", "two"]);

    store
        .append(&HistoryScope::Local, HistoryRecord::executed("three", "pwd", 0, ""))
        .unwrap();
    assert_eq!(
        prompts(&store.list(&HistoryScope::Local)),
        vec!["one", "two", "three"]
    );
}

#[test]
fn clearing_missing_stores_is_a_no_op() {
    let dir = tmp_dir("shellcraft-history");
    let paths = StoragePaths::new(dir.join("never-created"));
    let store = HistoryStore::new(logger(), paths.clone(), 10);
    store.clear(&HistoryScope::Local).expect("clear local");
    store
        .clear(&HistoryScope::Remote("ghost".to_string()))
        .expect("clear remote");
    store.purge_remote("ghost").expect("purge remote");

    let shell = ShellHistoryStore::new(logger(), paths);
    shell.clear_local().expect("clear shell history");
    shell.clear_remote_cache("ghost").expect("clear cache");
}

#[test]
fn purge_removes_every_remote_artifact() {
    let dir = tmp_dir("shellcraft-history");
    let paths = StoragePaths::new(&dir);
    let store = HistoryStore::new(logger(), paths.clone(), 10);
    let scope = HistoryScope::Remote("db".to_string());
    store
        .append(&scope, HistoryRecord::executed("x", "ls", 0, ""))
        .unwrap();
    std::fs::write(paths.remote_sysinfo_path("db"), "{}").unwrap();
    std::fs::write(paths.remote_shell_history_path("db"), "").unwrap();

    store.purge_remote("db").unwrap();
    assert!(!paths.remote_dir("db").exists());
    assert!(store.list(&scope).is_empty());
}

#[test]
fn local_shell_history_appends_and_limits() {
    let dir = tmp_dir("shellcraft-shell");
    let paths = StoragePaths::new(&dir);
    let shell = ShellHistoryStore::new(logger(), paths.clone());
    for (i, cmd) in ["ls", "make", "cargo fmt"].iter().enumerate() {
        shell
            .append_local(&ShellHistoryItem {
                cmd: cmd.to_string(),
                exit: i as i32,
                time: "2024-05-01T10:00:00Z".to_string(),
            })
            .unwrap();
    }
    let mut raw = std::fs::read_to_string(paths.local_shell_history_path()).unwrap();
    raw.push_str("{broken\n");
    std::fs::write(paths.local_shell_history_path(), raw).unwrap();

    let items = shell.read_local(2);
    let cmds: Vec<&str> = items.iter().map(|i| i.cmd.as_str()).collect();
    assert_eq!(cmds, vec!["make", "cargo fmt"]);
    assert_eq!(items[1].exit, 2);
}

#[test]
fn a_bad_byte_costs_only_its_own_record() {
    let dir = tmp_dir("shellcraft-history");
    let paths = StoragePaths::new(&dir);
    let store = HistoryStore::new(logger(), paths.clone(), 10);
    let scope = HistoryScope::Local;
    for prompt in ["a", "b", "c"] {
        store
            .append(&scope, HistoryRecord::executed(prompt, "true", 0, "marker-output"))
            .unwrap();
    }
    let mut bytes = std::fs::read(paths.local_history_path()).unwrap();
    let line_b = bytes
        .split(|byte| *byte == b'\n')
        .position(|line| line.windows(5).any(|w| w == b"\"b\",\""))
        .unwrap();
    let offset: usize = bytes
        .split(|byte| *byte == b'\n')
        .take(line_b)
        .map(|line| line.len() + 1)
        .sum();
    bytes[offset + 3] = 0xFF;
    std::fs::write(paths.local_history_path(), bytes).unwrap();

    assert_eq!(prompts(&store.list(&scope)), vec!["a", "c"]);
    store
        .append(&scope, HistoryRecord::executed("d", "true", 0, ""))
        .unwrap();
    assert_eq!(prompts(&store.list(&scope)), vec!["a", "c", "d"]);
}

#[test]
fn unreadable_history_is_not_overwritten() {
    let dir = tmp_dir("shellcraft-history");
    let paths = StoragePaths::new(&dir);
    std::fs::create_dir_all(paths.local_history_path()).unwrap();
    let store = HistoryStore::new(logger(), paths.clone(), 10);

    let err = store
        .append(&HistoryScope::Local, HistoryRecord::executed("x", "ls", 0, ""))
        .unwrap_err();
    assert_eq!(err.kind, shellcraft::errors::ErrorKind::Persistence);
    assert!(store.list(&HistoryScope::Local).is_empty());
    assert!(paths.local_history_path().is_dir());
}

#[test]
fn shell_history_skips_undecodable_lines() {
    let dir = tmp_dir("shellcraft-shell");
    let paths = StoragePaths::new(&dir);
    let mut raw = b"{\"cmd\":\"ls\",\"exit\":0,\"time\":\"2024-05-01T10:00:00Z\"}\n".to_vec();
    raw.extend_from_slice(b"{\"cmd\":\"m\xffke\",\"exit\":2,\"time\":\"2024-05-01T10:00:01Z\"}\n");
    raw.extend_from_slice(b"{\"cmd\":\"pwd\",\"exit\":0,\"time\":\"2024-05-01T10:00:02Z\"}\n");
    std::fs::write(paths.local_shell_history_path(), raw).unwrap();

    let shell = ShellHistoryStore::new(logger(), paths);
    let cmds: Vec<String> = shell.read_local(10).into_iter().map(|i| i.cmd).collect();
    assert_eq!(cmds, vec!["ls", "pwd"]);
}
