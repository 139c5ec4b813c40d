use crate::constants::history::REMOTE_SHELL_HISTORY_PATH;
use crate::constants::timeouts::PROBE_MS;
use crate::errors::AppError;
use crate::managers::executor::{CommandRunner, RunOptions};
use crate::models::{RemoteTarget, ShellHistoryItem};
use crate::services::logger::Logger;
use crate::utils::fs_atomic::{atomic_write_text_file, ensure_dir_for_file, remove_file_if_exists};
use crate::utils::paths::StoragePaths;
use crate::utils::text::decode_utf8_lines;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySource {
    Live,
    Cached,
    Empty,
}

#[derive(Debug, Clone)]
pub struct RemoteShellHistory {
    pub items: Vec<ShellHistoryItem>,
    pub source: HistorySource,
}

#[derive(Clone)]
pub struct ShellHistoryStore {
    logger: Logger,
    paths: StoragePaths,
    queue: Arc<Mutex<()>>,
}

pub fn parse_shell_history(raw: &str) -> Vec<ShellHistoryItem> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<ShellHistoryItem>(line).ok())
        .collect()
}

fn keep_last(mut items: Vec<ShellHistoryItem>, limit: usize) -> Vec<ShellHistoryItem> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

pub fn format_shell_history(items: &[ShellHistoryItem]) -> String {
    items
        .iter()
        .map(|item| format!("$ {} (exit {})", item.cmd, item.exit))
        .collect::<Vec<_>>()
        .join("\n")
}

impl ShellHistoryStore {
    pub fn new(logger: Logger, paths: StoragePaths) -> Self {
        Self {
            logger: logger.child("shell_history"),
            paths,
            queue: Arc::new(Mutex::new(())),
        }
    }

    fn read_file(&self, path: &Path) -> Vec<ShellHistoryItem> {
        match std::fs::read(path) {
            Ok(bytes) => parse_shell_history(&decode_utf8_lines(&bytes).0),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    self.logger.warn(
                        "Shell history read failed",
                        Some(&serde_json::json!({"path": path, "error": err.to_string()})),
                    );
                }
                Vec::new()
            }
        }
    }

    pub fn read_local(&self, limit: usize) -> Vec<ShellHistoryItem> {
        keep_last(self.read_file(&self.paths.local_shell_history_path()), limit)
    }

    pub fn append_local(&self, item: &ShellHistoryItem) -> Result<(), AppError> {
        let path = self.paths.local_shell_history_path();
        let line = serde_json::to_string(item)?;
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        ensure_dir_for_file(&path)
            .and_then(|_| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
            })
            .and_then(|mut file| writeln!(file, "{}", line))
            .map_err(|err| AppError::persistence(format!("Failed to record shell history: {}", err)))
    }

    pub fn clear_local(&self) -> Result<(), AppError> {
        self.remove(self.paths.local_shell_history_path())
    }

    pub fn clear_remote_cache(&self, name: &str) -> Result<(), AppError> {
        self.remove(self.paths.remote_shell_history_path(name))
    }

    fn remove(&self, path: PathBuf) -> Result<(), AppError> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        remove_file_if_exists(&path).map_err(|err| {
            AppError::persistence(format!("Failed to clear shell history: {}", err))
        })?;
        Ok(())
    }

    pub fn cached_remote(&self, name: &str, limit: usize) -> Vec<ShellHistoryItem> {
        keep_last(self.read_file(&self.paths.remote_shell_history_path(name)), limit)
    }

    fn save_snapshot(&self, name: &str, items: &[ShellHistoryItem]) -> Result<(), AppError> {
        let mut body = String::new();
        for item in items {
            body.push_str(&serde_json::to_string(item)?);
            body.push('\n');
        }
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        atomic_write_text_file(self.paths.remote_shell_history_path(name), &body, 0o600)
            .map_err(|err| AppError::persistence(format!("Failed to cache shell history: {}", err)))
    }

    pub async fn fetch_remote(
        &self,
        runner: &dyn CommandRunner,
        target: &RemoteTarget,
        limit: usize,
    ) -> RemoteShellHistory {
        let command = format!(
            "f={}; if [ -f \"$f\" ]; then tail -n {} \"$f\"; fi",
            REMOTE_SHELL_HISTORY_PATH.replacen('~', "$HOME", 1),
            limit.max(1)
        );
        let options = RunOptions::with_timeout(Duration::from_millis(PROBE_MS));
        match runner.run(&command, Some(target), options).await {
            Ok(outcome) if outcome.exit_code == 0 => {
                let items = keep_last(parse_shell_history(&outcome.output), limit);
                if !items.is_empty() {
                    if let Err(err) = self.save_snapshot(&target.name, &items) {
                        self.logger.warn(
                            "Could not cache remote shell history",
                            Some(&serde_json::json!({"remote": target.name, "error": err.message})),
                        );
                    }
                    return RemoteShellHistory {
                        items,
                        source: HistorySource::Live,
                    };
                }
            }
            Ok(outcome) => self.logger.debug(
                "Remote shell history fetch exited non-zero",
                Some(&serde_json::json!({"remote": target.name, "exit_code": outcome.exit_code})),
            ),
            Err(err) => self.logger.debug(
                "Remote shell history fetch failed, using cache",
                Some(&serde_json::json!({"remote": target.name, "error": err.message})),
            ),
        }
        let cached = self.cached_remote(&target.name, limit);
        let source = if cached.is_empty() {
            HistorySource::Empty
        } else {
            HistorySource::Cached
        };
        RemoteShellHistory {
            items: cached,
            source,
        }
    }
}
