use rand::{distributions::Alphanumeric, Rng};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub fn ensure_dir_for_file(path: impl AsRef<Path>) -> io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn temp_sibling_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("temp");
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    parent.join(format!("{}.{}.tmp", file_name, token))
}

pub fn atomic_write_text_file(path: impl AsRef<Path>, content: &str, mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    ensure_dir_for_file(path)?;
    let tmp = temp_sibling_path(path);
    {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)?;
    Ok(())
}

pub fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn remove_dir_if_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// Returns Ok(None) while another holder owns a fresh lock.
pub fn try_create_lock_file(path: impl AsRef<Path>, stale_after: Duration) -> io::Result<Option<LockFile>> {
    let path = path.as_ref();
    ensure_dir_for_file(path)?;
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            let _ = writeln!(file, "{}", std::process::id());
            Ok(Some(LockFile {
                path: path.to_path_buf(),
            }))
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let stale = fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .map(|age| age > stale_after)
                .unwrap_or(false);
            if stale {
                remove_file_if_exists(path)?;
                return try_create_lock_file(path, stale_after);
            }
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::{atomic_write_text_file, remove_file_if_exists, try_create_lock_file};
    use std::time::Duration;

    fn tmp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("shellcraft-fs-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn lock_file_is_exclusive_until_dropped() {
        let path = tmp_dir().join("web.lock");
        let first = try_create_lock_file(&path, Duration::from_secs(60))
            .expect("create lock")
            .expect("first holder");
        assert!(try_create_lock_file(&path, Duration::from_secs(60))
            .expect("second attempt")
            .is_none());
        drop(first);
        assert!(!path.exists());
        assert!(try_create_lock_file(&path, Duration::from_secs(60))
            .expect("third attempt")
            .is_some());
    }

    #[test]
    fn atomic_write_replaces_content() {
        let path = tmp_dir().join("data.json");
        atomic_write_text_file(&path, "one", 0o600).expect("write one");
        atomic_write_text_file(&path, "two", 0o600).expect("write two");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "two");
        assert!(remove_file_if_exists(&path).expect("remove"));
        assert!(!remove_file_if_exists(&path).expect("remove missing"));
    }
}
