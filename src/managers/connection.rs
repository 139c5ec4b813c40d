use crate::constants::network::{
    ESTABLISH_LOCK_STALE_MS, MASTER_READY_POLL_MS, SSHPASS_BAD_PASSWORD_EXIT_CODE,
    SSH_CONNECTION_EXIT_CODE,
};
use crate::errors::AppError;
use crate::managers::process::{run_process, OutputObserver, ProcessOutput, ProcessSpec};
use crate::models::{AuthMode, RemoteTarget};
use crate::services::logger::Logger;
use crate::services::secret::SecretProvider;
use crate::services::settings::Settings;
use crate::utils::fs_atomic::{remove_file_if_exists, try_create_lock_file, LockFile};
use crate::utils::paths::ensure_private_dir;
use crate::utils::shell::{expand_home_path, find_executable, with_work_dir};
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type CommandOutput = ProcessOutput;

const CONTROL_CHECK_TIMEOUT_MS: u64 = 5_000;
const LOCK_POLL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Absent,
    Establishing,
    Active,
    Closing,
}

#[derive(Clone, Default)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub stdin: Option<Vec<u8>>,
    pub observer: Option<OutputObserver>,
}

pub struct ConnectionManager {
    logger: Logger,
    ssh_program: String,
    sshpass_program: String,
    control_dir: PathBuf,
    connect_timeout: Duration,
    control_persist_secs: u64,
    secrets: Arc<dyn SecretProvider>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    transitions: DashMap<String, ConnectionState>,
    // One terminal, so one password prompt at a time across all targets.
    prompt: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MasterStatus {
    Alive,
    Gone,
    Unresponsive,
}

struct TransitionGuard<'a> {
    transitions: &'a DashMap<String, ConnectionState>,
    name: String,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.transitions.remove(&self.name);
    }
}

// ssh reports its own failures with exit 255; anything else came from the remote command.
pub fn classify_ssh_failure(
    target: &RemoteTarget,
    exit_code: i32,
    stderr: &str,
    via_sshpass: bool,
) -> Option<AppError> {
    let lower = stderr.to_lowercase();
    let details = serde_json::json!({
        "remote": target.name,
        "destination": target.destination(),
        "port": target.port,
        "exit_code": exit_code,
    });
    if via_sshpass && exit_code == SSHPASS_BAD_PASSWORD_EXIT_CODE {
        return Some(
            AppError::auth_failed(format!("Password rejected by {}", target.destination()))
                .with_details(details),
        );
    }
    if exit_code != SSH_CONNECTION_EXIT_CODE && !via_sshpass {
        return None;
    }
    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("too many authentication failures")
    {
        return Some(
            AppError::auth_failed(format!("Authentication failed for {}", target.destination()))
                .with_hint("Check the key, agent or password configured for this remote.")
                .with_details(details),
        );
    }
    if lower.contains("host key verification failed") {
        return Some(
            AppError::auth_failed(format!("Host key verification failed for {}", target.host))
                .with_hint("Inspect ~/.ssh/known_hosts; the host key changed or is unknown.")
                .with_details(details),
        );
    }
    if lower.contains("timed out") {
        return Some(
            AppError::connection_timeout(format!(
                "Connection to {}:{} timed out",
                target.host, target.port
            ))
            .with_details(details),
        );
    }
    let unreachable = [
        "could not resolve hostname",
        "name or service not known",
        "connection refused",
        "no route to host",
        "network is unreachable",
        "host is down",
        "connection closed by",
        "connection reset",
    ];
    if unreachable.iter().any(|needle| lower.contains(needle)) {
        return Some(
            AppError::unreachable(format!(
                "Cannot reach {}:{}: {}",
                target.host,
                target.port,
                stderr.trim()
            ))
            .with_details(details),
        );
    }
    if via_sshpass {
        return Some(
            AppError::unreachable(format!(
                "Could not open a channel to {}: {}",
                target.destination(),
                stderr.trim()
            ))
            .with_details(details),
        );
    }
    None
}

impl ConnectionManager {
    pub fn new(logger: Logger, settings: &Settings, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            logger: logger.child("ssh"),
            ssh_program: settings.ssh_program.clone(),
            sshpass_program: settings.sshpass_program.clone(),
            control_dir: settings.paths().control_dir(),
            connect_timeout: settings.connect_timeout(),
            control_persist_secs: settings.control_persist_secs,
            secrets,
            locks: DashMap::new(),
            transitions: DashMap::new(),
            prompt: tokio::sync::Mutex::new(()),
        }
    }

    // Hashed so long names stay under the unix socket path limit.
    pub fn control_path(&self, target: &RemoteTarget) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            target.name,
            target.destination(),
            target.port
        ));
        let digest = hex::encode(hasher.finalize());
        self.control_dir.join(format!("{}.sock", &digest[..16]))
    }

    pub fn is_active(&self, target: &RemoteTarget) -> bool {
        self.control_path(target).exists()
    }

    pub fn state(&self, target: &RemoteTarget) -> ConnectionState {
        if let Some(state) = self.transitions.get(&target.name) {
            return *state;
        }
        if self.is_active(target) {
            ConnectionState::Active
        } else {
            ConnectionState::Absent
        }
    }

    fn target_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn enter(&self, target: &RemoteTarget, state: ConnectionState) -> TransitionGuard<'_> {
        self.transitions.insert(target.name.clone(), state);
        TransitionGuard {
            transitions: &self.transitions,
            name: target.name.clone(),
        }
    }

    fn base_args(&self, target: &RemoteTarget) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            target.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if target.auth_mode == AuthMode::Key {
            if let Some(key) = target.key_path.as_ref() {
                args.push("-i".to_string());
                args.push(expand_home_path(key).to_string_lossy().to_string());
                args.push("-o".to_string());
                args.push("IdentitiesOnly=yes".to_string());
            }
        }
        args
    }

    pub async fn execute(
        &self,
        target: &RemoteTarget,
        command: &str,
        options: ExecOptions,
    ) -> Result<CommandOutput, AppError> {
        let control_path = self.control_path(target);
        if target.auth_mode.requires_secret() {
            self.ensure_master(target, &control_path).await?;
        }
        let multiplexed = control_path.exists();

        let mut args = self.base_args(target);
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        if multiplexed {
            args.push("-o".to_string());
            args.push(format!("ControlPath={}", control_path.display()));
            args.push("-o".to_string());
            args.push("ControlMaster=no".to_string());
        }
        args.push(target.destination());
        args.push(with_work_dir(command, target.work_dir.as_deref()));

        self.logger.debug(
            "Executing remote command",
            Some(&serde_json::json!({
                "remote": target.name,
                "multiplexed": multiplexed,
            })),
        );
        let spec = ProcessSpec::new(&self.ssh_program)
            .args(args)
            .stdin(options.stdin)
            .timeout(options.timeout)
            .observer(options.observer);
        let output = run_process(spec)
            .await
            .map_err(|err| self.spawn_error(&self.ssh_program, err))?;
        if output.timed_out {
            return Ok(output);
        }
        if let Some(err) = classify_ssh_failure(target, output.exit_code, &output.stderr, false) {
            self.logger.warn(
                "Remote command failed to connect",
                Some(&serde_json::json!({"remote": target.name, "kind": err.code})),
            );
            return Err(err);
        }
        Ok(output)
    }

    async fn ensure_master(&self, target: &RemoteTarget, control_path: &Path) -> Result<(), AppError> {
        if self.master_usable(target, control_path).await {
            return Ok(());
        }
        let lock = self.target_lock(&target.name);
        let _guard = lock.lock().await;
        if self.master_usable(target, control_path).await {
            return Ok(());
        }
        let _file_lock = self.acquire_establish_lock(target, control_path).await?;
        if self.master_usable(target, control_path).await {
            return Ok(());
        }
        let Some(sshpass) = find_executable(&self.sshpass_program) else {
            return Err(AppError::missing_dependency(format!(
                "'{}' is required for password authentication but was not found",
                self.sshpass_program
            ))
            .with_hint("Install sshpass, or switch the remote to key or agent auth."));
        };

        let _transition = self.enter(target, ConnectionState::Establishing);
        let secret = {
            let _prompt = self.prompt.lock().await;
            self.secrets.password_for(target).await?
        };
        self.start_master(target, control_path, &sshpass, secret).await
    }

    async fn start_master(
        &self,
        target: &RemoteTarget,
        control_path: &Path,
        sshpass: &Path,
        secret: String,
    ) -> Result<(), AppError> {
        let mut args = vec!["-e".to_string(), self.ssh_program.clone()];
        args.extend(self.base_args(target));
        args.extend(
            [
                "-M",
                "-N",
                "-f",
                "-o",
                "ControlMaster=yes",
                "-o",
                "NumberOfPasswordPrompts=1",
                "-o",
                "PubkeyAuthentication=no",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push("-o".to_string());
        args.push(format!("ControlPersist={}", self.control_persist_secs));
        args.push("-o".to_string());
        args.push(format!("ControlPath={}", control_path.display()));
        args.push(target.destination());

        self.logger.info(
            "Opening master channel",
            Some(&serde_json::json!({"remote": target.name, "destination": target.destination()})),
        );
        let spec = ProcessSpec::new(sshpass.to_string_lossy())
            .args(args)
            .env("SSHPASS", secret)
            .timeout(Some(self.connect_timeout + Duration::from_secs(5)));
        let output = run_process(spec)
            .await
            .map_err(|err| self.spawn_error(&self.sshpass_program, err))?;
        if output.timed_out {
            return Err(AppError::connection_timeout(format!(
                "Timed out opening a channel to {}",
                target.destination()
            )));
        }
        if output.exit_code != 0 {
            return Err(
                classify_ssh_failure(target, output.exit_code, &output.stderr, true).unwrap_or_else(
                    || {
                        AppError::unreachable(format!(
                            "Master channel to {} exited with {}",
                            target.destination(),
                            output.exit_code
                        ))
                    },
                ),
            );
        }

        let started = Instant::now();
        while !control_path.exists() {
            if started.elapsed() >= self.connect_timeout {
                return Err(AppError::connection_timeout(format!(
                    "Master channel to {} did not come up",
                    target.destination()
                )));
            }
            tokio::time::sleep(Duration::from_millis(MASTER_READY_POLL_MS)).await;
        }
        self.logger.info(
            "Master channel ready",
            Some(&serde_json::json!({"remote": target.name, "persist_secs": self.control_persist_secs})),
        );
        Ok(())
    }

    async fn acquire_establish_lock(
        &self,
        target: &RemoteTarget,
        control_path: &Path,
    ) -> Result<LockFile, AppError> {
        ensure_private_dir(&self.control_dir).map_err(|err| {
            AppError::persistence(format!("Failed to create control directory: {}", err))
        })?;
        let lock_path = control_path.with_extension("lock");
        let stale_after = Duration::from_millis(ESTABLISH_LOCK_STALE_MS);
        let started = Instant::now();
        loop {
            match try_create_lock_file(&lock_path, stale_after) {
                Ok(Some(lock)) => return Ok(lock),
                Ok(None) => {}
                Err(err) => {
                    return Err(AppError::persistence(format!(
                        "Failed to create establish lock: {}",
                        err
                    )))
                }
            }
            if started.elapsed() >= stale_after {
                return Err(AppError::connection_timeout(format!(
                    "Another process is still connecting to {}",
                    target.destination()
                ))
                .with_details(serde_json::json!({"lock": lock_path})));
            }
            let jitter = rand::thread_rng().gen_range(0..LOCK_POLL_MS);
            tokio::time::sleep(Duration::from_millis(LOCK_POLL_MS + jitter)).await;
        }
    }

    async fn master_usable(&self, target: &RemoteTarget, control_path: &Path) -> bool {
        match self.check_master(target, control_path).await {
            MasterStatus::Alive => true,
            MasterStatus::Unresponsive => {
                self.logger.warn(
                    "Control check inconclusive, keeping the existing master",
                    Some(&serde_json::json!({"remote": target.name})),
                );
                true
            }
            MasterStatus::Gone => false,
        }
    }

    async fn check_master(&self, target: &RemoteTarget, control_path: &Path) -> MasterStatus {
        if !control_path.exists() {
            return MasterStatus::Gone;
        }
        let spec = ProcessSpec::new(&self.ssh_program)
            .args([
                "-O".to_string(),
                "check".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", control_path.display()),
                target.destination(),
            ])
            .timeout(Some(Duration::from_millis(CONTROL_CHECK_TIMEOUT_MS)));
        match run_process(spec).await {
            Ok(output) if output.timed_out => MasterStatus::Unresponsive,
            Ok(output) if output.exit_code == 0 => MasterStatus::Alive,
            Ok(output) if control_socket_is_dead(&output.stderr) => {
                self.logger.debug(
                    "Discarding stale control socket",
                    Some(&serde_json::json!({"remote": target.name})),
                );
                let _ = remove_file_if_exists(control_path);
                MasterStatus::Gone
            }
            Ok(output) => {
                self.logger.debug(
                    "Control check failed",
                    Some(&serde_json::json!({"remote": target.name, "stderr": output.stderr.trim()})),
                );
                MasterStatus::Unresponsive
            }
            Err(err) => {
                self.logger.debug(
                    "Control check could not run",
                    Some(&serde_json::json!({"remote": target.name, "error": err.to_string()})),
                );
                MasterStatus::Unresponsive
            }
        }
    }

    pub async fn close(&self, target: &RemoteTarget) -> Result<bool, AppError> {
        let control_path = self.control_path(target);
        let lock = self.target_lock(&target.name);
        let _guard = lock.lock().await;
        if !control_path.exists() {
            return Ok(false);
        }
        let _transition = self.enter(target, ConnectionState::Closing);
        let spec = ProcessSpec::new(&self.ssh_program)
            .args([
                "-O".to_string(),
                "exit".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", control_path.display()),
                target.destination(),
            ])
            .timeout(Some(Duration::from_millis(CONTROL_CHECK_TIMEOUT_MS)));
        match run_process(spec).await {
            Ok(output) if output.exit_code == 0 => {}
            Ok(output) => self.logger.debug(
                "Control exit reported failure",
                Some(&serde_json::json!({"remote": target.name, "stderr": output.stderr.trim()})),
            ),
            Err(err) => self.logger.debug(
                "Control exit could not run",
                Some(&serde_json::json!({"remote": target.name, "error": err.to_string()})),
            ),
        }
        remove_file_if_exists(&control_path).map_err(|err| {
            AppError::persistence(format!("Failed to remove control socket: {}", err))
        })?;
        self.logger.info(
            "Master channel closed",
            Some(&serde_json::json!({"remote": target.name})),
        );
        Ok(true)
    }

    fn spawn_error(&self, program: &str, err: std::io::Error) -> AppError {
        if err.kind() == std::io::ErrorKind::NotFound {
            return AppError::missing_dependency(format!("'{}' was not found", program))
                .with_hint("Install the OpenSSH client or set ssh_program in config.json.");
        }
        AppError::internal(format!("Failed to start '{}': {}", program, err))
    }
}

// Only these mean nothing is listening on the socket any more.
fn control_socket_is_dead(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such file or directory") || lower.contains("connection refused")
}
