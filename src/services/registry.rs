use crate::constants::network::SSH_DEFAULT_PORT;
use crate::errors::AppError;
use crate::models::{AuthMode, RemoteTarget};
use crate::services::logger::Logger;
use crate::services::validation::Validation;
use crate::utils::fs_atomic::atomic_write_text_file;
use crate::utils::suggest::similar_names;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct NewRemote {
    pub name: String,
    pub host: String,
    pub user: String,
    pub port: Option<u32>,
    pub auth_mode: AuthMode,
    pub key_path: Option<String>,
    pub work_dir: Option<String>,
}

#[derive(Clone)]
pub struct RemoteRegistry {
    logger: Logger,
    validation: Validation,
    file_path: PathBuf,
    remotes: Arc<RwLock<BTreeMap<String, RemoteTarget>>>,
}

impl RemoteRegistry {
    pub fn new(logger: Logger, file_path: PathBuf) -> Result<Self, AppError> {
        let registry = Self {
            logger: logger.child("registry"),
            validation: Validation::new(),
            file_path,
            remotes: Arc::new(RwLock::new(BTreeMap::new())),
        };
        registry.load()?;
        Ok(registry)
    }

    fn load(&self) -> Result<(), AppError> {
        let raw = match std::fs::read_to_string(&self.file_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(AppError::persistence(format!(
                    "Failed to load remotes: {}",
                    err
                )))
            }
        };
        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.quarantine_corrupt_file(&err.to_string());
                return Ok(());
            }
        };
        let Some(obj) = parsed.as_object() else {
            self.quarantine_corrupt_file("top-level value is not an object");
            return Ok(());
        };
        let mut guard = self.remotes.write().unwrap_or_else(|err| err.into_inner());
        for (name, entry) in obj {
            let mut entry = entry.clone();
            if let Value::Object(map) = &mut entry {
                map.insert("name".to_string(), Value::String(name.clone()));
            }
            match serde_json::from_value::<RemoteTarget>(entry) {
                Ok(target) => {
                    guard.insert(name.clone(), target);
                }
                Err(err) => self.logger.warn(
                    "Skipping invalid remote entry",
                    Some(&serde_json::json!({"name": name, "error": err.to_string()})),
                ),
            }
        }
        Ok(())
    }

    fn quarantine_corrupt_file(&self, reason: &str) {
        let backup = self.file_path.with_extension(format!(
            "json.corrupt-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        ));
        let _ = std::fs::rename(&self.file_path, &backup);
        self.logger.warn(
            "Remote registry is unreadable, starting empty",
            Some(&serde_json::json!({"reason": reason, "backup": backup})),
        );
    }

    fn persist(&self, remotes: &BTreeMap<String, RemoteTarget>) -> Result<(), AppError> {
        let mut doc = serde_json::Map::new();
        for (name, target) in remotes {
            let mut value = serde_json::to_value(target)?;
            if let Value::Object(map) = &mut value {
                map.remove("name");
            }
            doc.insert(name.clone(), value);
        }
        let data = serde_json::to_string_pretty(&Value::Object(doc))?;
        atomic_write_text_file(&self.file_path, &format!("{}\n", data), 0o600)
            .map_err(|err| AppError::persistence(format!("Failed to save remotes: {}", err)))?;
        Ok(())
    }

    pub fn add(&self, input: NewRemote) -> Result<RemoteTarget, AppError> {
        let name = self.validation.ensure_remote_name(&input.name)?;
        let target = RemoteTarget {
            host: self.validation.ensure_host(&input.host)?,
            user: self.validation.ensure_string(&input.user, "User")?,
            port: self.validation.ensure_port(input.port, SSH_DEFAULT_PORT)?,
            auth_mode: input.auth_mode,
            key_path: self
                .validation
                .ensure_optional_string(input.key_path.as_deref(), "Key path")?,
            work_dir: self
                .validation
                .ensure_optional_string(input.work_dir.as_deref(), "Working directory")?,
            name: name.clone(),
        };
        if target.auth_mode == AuthMode::Key && target.key_path.is_none() {
            return Err(AppError::invalid_params(
                "Key authentication requires a key path",
            )
            .with_hint("Pass --key ~/.ssh/id_ed25519, or use --auth agent."));
        }

        let mut guard = self.remotes.write().unwrap_or_else(|err| err.into_inner());
        if guard.contains_key(&name) {
            return Err(AppError::conflict(format!("Remote '{}' already exists", name))
                .with_hint("Remove it first or pick another name."));
        }
        guard.insert(name.clone(), target.clone());
        if let Err(err) = self.persist(&guard) {
            guard.remove(&name);
            return Err(err);
        }
        self.logger.info(
            "Remote registered",
            Some(&serde_json::json!({"name": name, "host": target.host})),
        );
        Ok(target)
    }

    pub fn get(&self, name: &str) -> Result<RemoteTarget, AppError> {
        let guard = self.remotes.read().unwrap_or_else(|err| err.into_inner());
        if let Some(target) = guard.get(name.trim()) {
            return Ok(target.clone());
        }
        Err(self.unknown_error(&[name.trim().to_string()], &guard))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.remotes
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .contains_key(name.trim())
    }

    pub fn list(&self) -> Vec<RemoteTarget> {
        self.remotes
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn resolve_all(&self, names: &[String]) -> Result<Vec<RemoteTarget>, AppError> {
        if names.is_empty() {
            return Err(AppError::invalid_params("At least one remote is required"));
        }
        let guard = self.remotes.read().unwrap_or_else(|err| err.into_inner());
        let mut unknown = Vec::new();
        let mut resolved = Vec::new();
        for name in names {
            let trimmed = name.trim();
            match guard.get(trimmed) {
                Some(target) => {
                    if !resolved.iter().any(|t: &RemoteTarget| t.name == target.name) {
                        resolved.push(target.clone());
                    }
                }
                None => unknown.push(trimmed.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(self.unknown_error(&unknown, &guard));
        }
        Ok(resolved)
    }

    fn unknown_error(&self, unknown: &[String], remotes: &BTreeMap<String, RemoteTarget>) -> AppError {
        let mut suggestions = Vec::new();
        for name in unknown {
            for candidate in similar_names(name, remotes.keys().map(String::as_str)) {
                if !suggestions.contains(&candidate) {
                    suggestions.push(candidate);
                }
            }
        }
        let message = if unknown.len() == 1 {
            format!("Unknown remote: {}", unknown[0])
        } else {
            format!("Unknown remotes: {}", unknown.join(", "))
        };
        let mut err = AppError::not_found(message).with_details(serde_json::json!({
            "unknown": unknown,
            "did_you_mean": suggestions,
        }));
        if !suggestions.is_empty() {
            err = err.with_hint(format!("Did you mean: {}?", suggestions.join(", ")));
        } else {
            err = err.with_hint("Run `shellcraft remote list` to see registered remotes.");
        }
        err
    }

    pub fn remove(&self, name: &str) -> Result<RemoteTarget, AppError> {
        let mut guard = self.remotes.write().unwrap_or_else(|err| err.into_inner());
        let Some(removed) = guard.remove(name.trim()) else {
            return Err(self.unknown_error(&[name.trim().to_string()], &guard));
        };
        if let Err(err) = self.persist(&guard) {
            guard.insert(removed.name.clone(), removed);
            return Err(err);
        }
        self.logger.info(
            "Remote removed",
            Some(&serde_json::json!({"name": removed.name})),
        );
        Ok(removed)
    }

    pub fn set_work_dir(&self, name: &str, work_dir: Option<&str>) -> Result<RemoteTarget, AppError> {
        let work_dir = self
            .validation
            .ensure_optional_string(work_dir, "Working directory")?;
        let mut guard = self.remotes.write().unwrap_or_else(|err| err.into_inner());
        let Some(existing) = guard.get(name.trim()).cloned() else {
            return Err(self.unknown_error(&[name.trim().to_string()], &guard));
        };
        let mut updated = existing.clone();
        updated.work_dir = work_dir;
        guard.insert(updated.name.clone(), updated.clone());
        if let Err(err) = self.persist(&guard) {
            guard.insert(existing.name.clone(), existing);
            return Err(err);
        }
        Ok(updated)
    }
}
