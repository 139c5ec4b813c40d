use crate::constants::timeouts::PROBE_MS;
use crate::errors::AppError;
use crate::managers::executor::{CommandRunner, RunOptions};
use crate::models::{RemoteTarget, SystemInfo};
use crate::services::logger::Logger;
use crate::utils::fs_atomic::atomic_write_text_file;
use crate::utils::paths::StoragePaths;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PROBE_SCRIPT: &str = concat!(
    "echo \"os=$(uname -s)\"; ",
    "if [ -r /etc/os-release ]; then (. /etc/os-release; echo \"distro=$PRETTY_NAME\"); fi; ",
    "echo \"kernel=$(uname -r)\"; ",
    "echo \"arch=$(uname -m)\"; ",
    "echo \"hostname=$(hostname 2>/dev/null || uname -n)\"; ",
    "echo \"user=$(id -un 2>/dev/null || whoami)\"; ",
    "echo \"shell=${SHELL:-sh}\"; ",
    "for pm in apt-get dnf yum pacman apk zypper brew; do ",
    "if command -v $pm >/dev/null 2>&1; then echo \"package_manager=$pm\"; break; fi; ",
    "done"
);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSystemInfo {
    cached_at: String,
    info: SystemInfo,
}

#[derive(Clone)]
pub struct SysInfoService {
    logger: Logger,
    paths: StoragePaths,
    ttl_ms: u64,
    queue: Arc<Mutex<()>>,
}

pub fn parse_probe_output(raw: &str) -> SystemInfo {
    let mut info = SystemInfo {
        collected_at: chrono::Utc::now().to_rfc3339(),
        ..SystemInfo::default()
    };
    let mut distro = None;
    for line in raw.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "os" => info.os = value,
            "distro" => distro = Some(value),
            "kernel" => info.kernel = value,
            "arch" => info.arch = value,
            "hostname" => info.hostname = value,
            "user" => info.user = value,
            "shell" => info.shell = value,
            "package_manager" => info.package_manager = Some(value),
            _ => {}
        }
    }
    if let Some(distro) = distro {
        info.os = if info.os.is_empty() {
            distro
        } else {
            format!("{} ({})", distro, info.os)
        };
    }
    info
}

fn fallback_local_info() -> SystemInfo {
    SystemInfo {
        os: std::env::consts::OS.to_string(),
        kernel: String::new(),
        arch: std::env::consts::ARCH.to_string(),
        hostname: std::env::var("HOSTNAME").unwrap_or_default(),
        user: std::env::var("USER").unwrap_or_default(),
        shell: std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string()),
        package_manager: None,
        collected_at: chrono::Utc::now().to_rfc3339(),
    }
}

fn is_fresh(cached_at: &str, ttl_ms: u64) -> bool {
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(cached_at) else {
        return false;
    };
    let elapsed = chrono::Utc::now().timestamp_millis() - created.timestamp_millis();
    elapsed >= 0 && (elapsed as u64) <= ttl_ms
}

impl SysInfoService {
    pub fn new(logger: Logger, paths: StoragePaths, ttl_ms: u64) -> Self {
        Self {
            logger: logger.child("sysinfo"),
            paths,
            ttl_ms,
            queue: Arc::new(Mutex::new(())),
        }
    }

    fn read_cache(&self, name: &str) -> Option<CachedSystemInfo> {
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        let raw = std::fs::read_to_string(self.paths.remote_sysinfo_path(name)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                self.logger.warn(
                    "Ignoring unreadable system info cache",
                    Some(&serde_json::json!({"remote": name, "error": err.to_string()})),
                );
                None
            }
        }
    }

    fn write_cache(&self, name: &str, info: &SystemInfo) -> Result<(), AppError> {
        let entry = CachedSystemInfo {
            cached_at: chrono::Utc::now().to_rfc3339(),
            info: info.clone(),
        };
        let data = serde_json::to_string_pretty(&entry)?;
        let _guard = self.queue.lock().unwrap_or_else(|err| err.into_inner());
        atomic_write_text_file(
            self.paths.remote_sysinfo_path(name),
            &format!("{}\n", data),
            0o600,
        )
        .map_err(|err| AppError::persistence(format!("Failed to cache system info: {}", err)))
    }

    pub fn cached(&self, name: &str) -> Option<SystemInfo> {
        self.read_cache(name)
            .filter(|entry| is_fresh(&entry.cached_at, self.ttl_ms))
            .map(|entry| entry.info)
    }

    async fn probe(
        &self,
        runner: &dyn CommandRunner,
        target: Option<&RemoteTarget>,
    ) -> Result<SystemInfo, AppError> {
        let outcome = runner
            .run(
                PROBE_SCRIPT,
                target,
                RunOptions::with_timeout(Duration::from_millis(PROBE_MS)),
            )
            .await?;
        if outcome.exit_code != 0 && outcome.output.trim().is_empty() {
            return Err(AppError::internal(format!(
                "System probe exited with {}",
                outcome.exit_code
            )));
        }
        Ok(parse_probe_output(&outcome.output))
    }

    pub async fn local(&self, runner: &dyn CommandRunner) -> SystemInfo {
        match self.probe(runner, None).await {
            Ok(info) => info,
            Err(err) => {
                self.logger.debug(
                    "Local probe failed, using process environment",
                    Some(&serde_json::json!({"error": err.message})),
                );
                fallback_local_info()
            }
        }
    }

    // A stale snapshot beats no context when the host cannot be probed.
    pub async fn remote(
        &self,
        runner: &dyn CommandRunner,
        target: &RemoteTarget,
        refresh: bool,
    ) -> Result<SystemInfo, AppError> {
        if !refresh {
            if let Some(info) = self.cached(&target.name) {
                return Ok(info);
            }
        }
        match self.probe(runner, Some(target)).await {
            Ok(info) => {
                if let Err(err) = self.write_cache(&target.name, &info) {
                    self.logger.warn(
                        "System info not cached",
                        Some(&serde_json::json!({"remote": target.name, "error": err.message})),
                    );
                }
                Ok(info)
            }
            Err(err) => match self.read_cache(&target.name) {
                Some(entry) if !refresh => {
                    self.logger.warn(
                        "Probe failed, using stale system info",
                        Some(&serde_json::json!({"remote": target.name, "error": err.message})),
                    );
                    Ok(entry.info)
                }
                _ => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_fresh, parse_probe_output};

    #[test]
    fn probe_output_is_parsed() {
        let raw = "os=Linux\ndistro=Ubuntu 22.04.4 LTS\nkernel=6.5.0\narch=x86_64\nhostname=web1\nuser=deploy\nshell=/bin/bash\npackage_manager=apt-get\nnoise line\n";
        let info = parse_probe_output(raw);
        assert_eq!(info.os, "Ubuntu 22.04.4 LTS (Linux)");
        assert_eq!(info.arch, "x86_64");
        assert_eq!(info.package_manager.as_deref(), Some("apt-get"));
        assert!(info.summary().contains("Hostname: web1"));
    }

    #[test]
    fn freshness_respects_ttl() {
        let now = chrono::Utc::now();
        let recent = (now - chrono::Duration::minutes(5)).to_rfc3339();
        let old = (now - chrono::Duration::days(8)).to_rfc3339();
        let week = 7 * 24 * 60 * 60 * 1000;
        assert!(is_fresh(&recent, week));
        assert!(!is_fresh(&old, week));
        assert!(!is_fresh("garbage", week));
    }
}
