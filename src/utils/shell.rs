use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

const OUT_OF_PROCESS_BUILTINS: &[&str] = &[
    "cd", "export", "source", ".", "alias", "unalias", "unset", "exit", "pushd", "popd",
];

static LEADING_ASSIGNMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*=\S*\s+)*").expect("assignment regex"));

pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

pub fn with_work_dir(command: &str, work_dir: Option<&str>) -> String {
    match work_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        Some(dir) => format!("cd {} && {}", shell_quote(dir), command),
        None => command.to_string(),
    }
}

// Only the first simple command matters; `cd /tmp && ls` still loses its cd.
pub fn detect_builtin(command: &str) -> Option<&'static str> {
    let trimmed = command.trim();
    let stripped = LEADING_ASSIGNMENTS.replace(trimmed, "");
    let first = stripped
        .split(|c: char| c.is_whitespace() || c == ';' || c == '&' || c == '|')
        .find(|token| !token.is_empty())?;
    OUT_OF_PROCESS_BUILTINS
        .iter()
        .find(|builtin| **builtin == first)
        .copied()
}

pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

pub fn expand_home_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Some(str_path) = path.to_str() {
        if let Ok(home) = std::env::var("HOME") {
            if let Some(rest) = str_path.strip_prefix("~/") {
                return PathBuf::from(home).join(rest);
            }
            if str_path == "~" {
                return PathBuf::from(home);
            }
        }
    }
    path.to_path_buf()
}
