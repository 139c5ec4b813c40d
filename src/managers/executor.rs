use crate::constants::timeouts::TIMED_OUT_EXIT_CODE;
use crate::errors::AppError;
use crate::managers::connection::{ConnectionManager, ExecOptions};
use crate::managers::process::{run_process, OutputObserver, ProcessOutput, ProcessSpec};
use crate::models::RemoteTarget;
use crate::services::logger::Logger;
use crate::services::settings::Settings;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub observer: Option<OutputObserver>,
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            observer: None,
        }
    }

    pub fn observer(mut self, observer: OutputObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    fn from_process(output: ProcessOutput, timeout: Option<Duration>) -> Self {
        let mut text = output.combined();
        if output.truncated {
            text.push_str("\n[output truncated]");
        }
        if output.timed_out {
            let limit = timeout.map(|t| t.as_millis()).unwrap_or_default();
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("[timed out after {} ms]", limit));
            return Self {
                exit_code: TIMED_OUT_EXIT_CODE,
                output: text,
                timed_out: true,
            };
        }
        Self {
            exit_code: output.exit_code,
            output: text,
            timed_out: false,
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        target: Option<&RemoteTarget>,
        options: RunOptions,
    ) -> Result<StepOutcome, AppError>;
}

pub struct StepExecutor {
    logger: Logger,
    shell_program: String,
    default_timeout: Duration,
    connections: Arc<ConnectionManager>,
}

impl StepExecutor {
    pub fn new(logger: Logger, settings: &Settings, connections: Arc<ConnectionManager>) -> Self {
        Self {
            logger: logger.child("executor"),
            shell_program: settings.shell_program.clone(),
            default_timeout: settings.command_timeout(),
            connections,
        }
    }

    async fn run_local(
        &self,
        command: &str,
        timeout: Duration,
        observer: Option<OutputObserver>,
    ) -> Result<ProcessOutput, AppError> {
        let spec = ProcessSpec::new(&self.shell_program)
            .args(["-c", command])
            .timeout(Some(timeout))
            .observer(observer);
        run_process(spec).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::missing_dependency(format!("Shell '{}' was not found", self.shell_program))
                    .with_hint("Set shell_program in config.json.")
            } else {
                AppError::internal(format!("Failed to start local command: {}", err))
            }
        })
    }
}

#[async_trait]
impl CommandRunner for StepExecutor {
    async fn run(
        &self,
        command: &str,
        target: Option<&RemoteTarget>,
        options: RunOptions,
    ) -> Result<StepOutcome, AppError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let output = match target {
            Some(target) => {
                self.connections
                    .execute(
                        target,
                        command,
                        ExecOptions {
                            timeout: Some(timeout),
                            stdin: None,
                            observer: options.observer,
                        },
                    )
                    .await?
            }
            None => self.run_local(command, timeout, options.observer).await?,
        };
        let outcome = StepOutcome::from_process(output, Some(timeout));
        self.logger.debug(
            "Command finished",
            Some(&serde_json::json!({
                "remote": target.map(|t| t.name.as_str()),
                "exit_code": outcome.exit_code,
                "timed_out": outcome.timed_out,
            })),
        );
        Ok(outcome)
    }
}
