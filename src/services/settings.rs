use crate::constants::{cache, generation, history, limits, network, timeouts};
use crate::errors::AppError;
use crate::utils::paths::{resolve_base_dir, StoragePaths};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip)]
    pub base_dir: PathBuf,
    pub api_base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_steps: usize,
    pub history_retention: usize,
    pub shell_history_limit: usize,
    pub command_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub control_persist_secs: u64,
    pub batch_concurrency: usize,
    pub sysinfo_ttl_ms: u64,
    pub auto_confirm: bool,
    pub ssh_program: String,
    pub sshpass_program: String,
    pub shell_program: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::new(),
            api_base_url: generation::DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: generation::DEFAULT_MODEL.to_string(),
            max_steps: limits::DEFAULT_MAX_STEPS,
            history_retention: history::DEFAULT_RETENTION,
            shell_history_limit: history::DEFAULT_SHELL_HISTORY_LIMIT,
            command_timeout_ms: timeouts::COMMAND_DEFAULT_MS,
            connect_timeout_ms: network::TIMEOUT_CONNECT_MS,
            control_persist_secs: network::CONTROL_PERSIST_SECS,
            batch_concurrency: limits::DEFAULT_BATCH_CONCURRENCY,
            sysinfo_ttl_ms: cache::SYSINFO_TTL_MS,
            auto_confirm: false,
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            shell_program: "sh".to_string(),
        }
    }
}

pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_positive<T: std::str::FromStr + PartialOrd + Default>(key: &str) -> Option<T> {
    env_string(key)
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v > T::default())
}

impl Settings {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self, AppError> {
        Self::load_from(resolve_base_dir())
    }

    pub fn load_from(base_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_dir = base_dir.into();
        let config_path = StoragePaths::new(&base_dir).config_path();
        let mut settings = match std::fs::read_to_string(&config_path) {
            Ok(raw) => serde_json::from_str::<Settings>(&raw).map_err(|err| {
                AppError::invalid_params(format!(
                    "Failed to parse {}: {}",
                    config_path.display(),
                    err
                ))
                .with_hint("Fix or remove the config file; every field is optional.")
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(err) => {
                return Err(AppError::persistence(format!(
                    "Failed to read {}: {}",
                    config_path.display(),
                    err
                )))
            }
        };
        settings.base_dir = base_dir;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Some(value) = env_string("SHELLCRAFT_API_BASE") {
            self.api_base_url = value;
        }
        if let Some(value) =
            env_string("SHELLCRAFT_API_KEY").or_else(|| env_string("OPENAI_API_KEY"))
        {
            self.api_key = Some(value);
        }
        if let Some(value) = env_string("SHELLCRAFT_MODEL") {
            self.model = value;
        }
        if let Some(value) = env_positive::<usize>("SHELLCRAFT_MAX_STEPS") {
            self.max_steps = value;
        }
        if let Some(value) = env_positive::<usize>("SHELLCRAFT_HISTORY_LIMIT") {
            self.history_retention = value;
        }
        if let Some(value) = env_positive::<u64>("SHELLCRAFT_COMMAND_TIMEOUT_MS") {
            self.command_timeout_ms = value;
        }
        if let Some(value) = env_positive::<usize>("SHELLCRAFT_BATCH_CONCURRENCY") {
            self.batch_concurrency = value;
        }
        if let Some(value) = env_string("SHELLCRAFT_AUTO_CONFIRM") {
            self.auto_confirm = is_truthy(value);
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_steps == 0 {
            return Err(AppError::invalid_params("max_steps must be at least 1"));
        }
        if self.history_retention == 0 {
            return Err(AppError::invalid_params(
                "history_retention must be at least 1",
            ));
        }
        if self.batch_concurrency == 0 {
            return Err(AppError::invalid_params(
                "batch_concurrency must be at least 1",
            ));
        }
        url::Url::parse(&self.api_base_url).map_err(|err| {
            AppError::invalid_params(format!("api_base_url is not a valid URL: {}", err))
        })?;
        Ok(())
    }

    pub fn paths(&self) -> StoragePaths {
        StoragePaths::new(&self.base_dir)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
