use std::env;
use std::path::{Path, PathBuf};

pub(crate) fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_home_dir() -> Option<PathBuf> {
    env::var("HOME").ok().map(PathBuf::from)
}

fn resolve_xdg_state_dir() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("XDG_STATE_HOME").ok()) {
        return Some(path);
    }
    resolve_home_dir().map(|home| home.join(".local").join("state"))
}

pub fn resolve_base_dir() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("SHELLCRAFT_HOME").ok()) {
        return path;
    }
    if let Some(path) = resolve_xdg_state_dir() {
        return path.join("shellcraft");
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".shellcraft")
}

#[derive(Debug, Clone)]
pub struct StoragePaths {
    base_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    pub fn remotes_path(&self) -> PathBuf {
        self.base_dir.join("remotes.json")
    }

    pub fn local_history_path(&self) -> PathBuf {
        self.base_dir.join("history.json")
    }

    pub fn local_shell_history_path(&self) -> PathBuf {
        self.base_dir.join("shell_history.jsonl")
    }

    pub fn remotes_dir(&self) -> PathBuf {
        self.base_dir.join("remotes")
    }

    pub fn remote_dir(&self, name: &str) -> PathBuf {
        self.remotes_dir().join(name)
    }

    pub fn remote_history_path(&self, name: &str) -> PathBuf {
        self.remote_dir(name).join("history.json")
    }

    pub fn remote_shell_history_path(&self, name: &str) -> PathBuf {
        self.remote_dir(name).join("shell_history.jsonl")
    }

    pub fn remote_sysinfo_path(&self, name: &str) -> PathBuf {
        self.remote_dir(name).join("sysinfo.json")
    }

    pub fn control_dir(&self) -> PathBuf {
        self.base_dir.join("ctl")
    }
}

// Creates the directory itself (not just its parent) and makes it owner-only.
pub fn ensure_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
