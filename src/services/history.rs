use crate::errors::AppError;
use crate::models::HistoryRecord;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::{atomic_write_text_file, remove_dir_if_exists, remove_file_if_exists};
use crate::utils::paths::StoragePaths;
use crate::utils::text::{decode_utf8_lines, first_line, truncate_utf8_prefix};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const CONTEXT_OUTPUT_PREVIEW_BYTES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HistoryScope {
    Local,
    Remote(String),
}

impl HistoryScope {
    pub fn for_target(name: Option<&str>) -> Self {
        match name {
            Some(name) => HistoryScope::Remote(name.to_string()),
            None => HistoryScope::Local,
        }
    }
}

impl fmt::Display for HistoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryScope::Local => write!(f, "local"),
            HistoryScope::Remote(name) => write!(f, "remote:{}", name),
        }
    }
}

#[derive(Clone)]
pub struct HistoryStore {
    logger: Logger,
    paths: StoragePaths,
    retention: usize,
    queue: Arc<Mutex<()>>,
}

impl HistoryStore {
    pub fn new(logger: Logger, paths: StoragePaths, retention: usize) -> Self {
        Self {
            logger: logger.child("history"),
            paths,
            retention: retention.max(1),
            queue: Arc::new(Mutex::new(())),
        }
    }

    fn path_for(&self, scope: &HistoryScope) -> PathBuf {
        match scope {
            HistoryScope::Local => self.paths.local_history_path(),
            HistoryScope::Remote(name) => self.paths.remote_history_path(name),
        }
    }

    fn read_records(&self, scope: &HistoryScope) -> Result<Vec<HistoryRecord>, AppError> {
        let path = self.path_for(scope);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::persistence(format!(
                    "Failed to read {} history: {}",
                    scope, err
                ))
                .with_details(serde_json::json!({"path": path})))
            }
        };
        let (raw, undecodable) = decode_utf8_lines(&bytes);
        let (records, skipped) = parse_history_document(&raw);
        let skipped = skipped + undecodable;
        if skipped > 0 {
            self.logger.warn(
                "Skipping invalid history entries",
                Some(&serde_json::json!({"scope": scope.to_string(), "skipped": skipped})),
            );
        }
        Ok(records)
    }

    fn write_records(&self, scope: &HistoryScope, records: &[HistoryRecord]) -> Result<(), AppError> {
        let mut lines = Vec::with_capacity(records.len());
        for record in records {
            lines.push(serde_json::to_string(record)?);
        }
        let body = if lines.is_empty() {
            "[]\n".to_string()
        } else {
            format!("[\n{}\n]\n", lines.join(",\n"))
        };
        atomic_write_text_file(self.path_for(scope), &body, 0o600).map_err(|err| {
            AppError::persistence(format!("Failed to save {} history: {}", scope, err))
        })
    }

    pub fn append(&self, scope: &HistoryScope, record: HistoryRecord) -> Result<(), AppError> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        let mut records = self.read_records(scope)?;
        records.push(record);
        if records.len() > self.retention {
            let overflow = records.len() - self.retention;
            records.drain(..overflow);
        }
        self.write_records(scope, &records)
    }

    pub fn list(&self, scope: &HistoryScope) -> Vec<HistoryRecord> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        match self.read_records(scope) {
            Ok(records) => records,
            Err(err) => {
                self.logger.warn(
                    "History read failed",
                    Some(&serde_json::json!({"scope": scope.to_string(), "error": err.message})),
                );
                Vec::new()
            }
        }
    }

    pub fn clear(&self, scope: &HistoryScope) -> Result<(), AppError> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        remove_file_if_exists(self.path_for(scope)).map_err(|err| {
            AppError::persistence(format!("Failed to clear {} history: {}", scope, err))
        })?;
        Ok(())
    }

    pub fn format(&self, scope: &HistoryScope, limit: usize) -> String {
        let records = self.list(scope);
        format_history(&records, limit)
    }

    pub fn purge_remote(&self, name: &str) -> Result<(), AppError> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        remove_dir_if_exists(self.paths.remote_dir(name)).map_err(|err| {
            AppError::persistence(format!("Failed to remove data for '{}': {}", name, err))
        })?;
        Ok(())
    }
}

// One record per line inside the array, so a truncated file can still be salvaged line by line.
pub fn parse_history_document(raw: &str) -> (Vec<HistoryRecord>, usize) {
    if raw.trim().is_empty() {
        return (Vec::new(), 0);
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
        let total = items.len();
        let records: Vec<HistoryRecord> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        let skipped = total - records.len();
        return (records, skipped);
    }
    let mut records = Vec::new();
    let mut skipped = 0usize;
    for line in raw.lines() {
        let candidate = line
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim()
            .trim_end_matches(',')
            .trim();
        if candidate.is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(candidate) {
            Ok(record) => records.push(record),
            Err(_) => skipped += 1,
        }
    }
    (records, skipped)
}

pub fn format_history(records: &[HistoryRecord], limit: usize) -> String {
    if records.is_empty() || limit == 0 {
        return String::new();
    }
    let start = records.len().saturating_sub(limit);
    records[start..]
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let status = match (record.executed, record.exit_code) {
                (true, Some(code)) => format!("exit {}", code),
                (true, None) => "exit ?".to_string(),
                (false, _) => format!(
                    "not executed: {}",
                    record.reason.as_deref().unwrap_or("skipped")
                ),
            };
            let mut line = format!(
                "{}. \"{}\" -> `{}` ({})",
                i + 1,
                record.user_prompt,
                record.command,
                status
            );
            let preview = first_line(&record.output);
            if record.executed && !preview.is_empty() {
                line.push_str(&format!(
                    "\n   output: {}",
                    truncate_utf8_prefix(preview, CONTEXT_OUTPUT_PREVIEW_BYTES)
                ));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
