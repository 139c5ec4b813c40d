use crate::constants::network::SSH_CONNECTION_EXIT_CODE;
use crate::errors::{AppError, ErrorKind};
use crate::managers::executor::{CommandRunner, RunOptions};
use crate::managers::process::OutputObserver;
use crate::models::{ExecutionLog, HistoryRecord, RemoteTarget};
use crate::services::confirm::{Confirmer, Decision, Proposal};
use crate::services::generation::{GenerationRequest, GenerationService};
use crate::services::history::{HistoryScope, HistoryStore};
use crate::services::logger::Logger;
use crate::services::plan::{parse_plan, PlanMode, StepPlan};
use crate::utils::shell::detect_builtin;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct RunRequest {
    pub user_text: String,
    pub target: Option<RemoteTarget>,
    pub mode: PlanMode,
    pub system_context: String,
    pub history_context: String,
    pub observer: Option<OutputObserver>,
}

impl RunRequest {
    pub fn new(user_text: impl Into<String>, mode: PlanMode) -> Self {
        Self {
            user_text: user_text.into(),
            target: None,
            mode,
            system_context: String::new(),
            history_context: String::new(),
            observer: None,
        }
    }

    pub fn on(mut self, target: Option<RemoteTarget>) -> Self {
        self.target = target;
        self
    }

    pub fn with_context(
        mut self,
        system_context: impl Into<String>,
        history_context: impl Into<String>,
    ) -> Self {
        self.system_context = system_context.into();
        self.history_context = history_context.into();
        self
    }

    pub fn with_observer(mut self, observer: Option<OutputObserver>) -> Self {
        self.observer = observer;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Aborted { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: Option<String>,
    #[serde(flatten)]
    pub status: RunStatus,
    pub log: ExecutionLog,
    pub generation_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.log.last().map(|step| step.exit_code)
    }
}

enum Terminal {
    Done,
    Aborted(String, Option<AppError>),
}

pub struct Orchestrator {
    logger: Logger,
    generator: Arc<dyn GenerationService>,
    runner: Arc<dyn CommandRunner>,
    confirmer: Arc<dyn Confirmer>,
    history: HistoryStore,
    max_steps: usize,
}

fn feeds_back_as_step(err: &AppError) -> bool {
    matches!(err.kind, ErrorKind::ConnectionTimeout | ErrorKind::Unreachable)
}

impl Orchestrator {
    pub fn new(
        logger: Logger,
        generator: Arc<dyn GenerationService>,
        runner: Arc<dyn CommandRunner>,
        confirmer: Arc<dyn Confirmer>,
        history: HistoryStore,
        max_steps: usize,
    ) -> Self {
        Self {
            logger: logger.child("orchestrator"),
            generator,
            runner,
            confirmer,
            history,
            max_steps: max_steps.max(1),
        }
    }

    fn remember(&self, scope: &HistoryScope, record: HistoryRecord) {
        if let Err(err) = self.history.append(scope, record) {
            self.logger.warn(
                "History not recorded",
                Some(&serde_json::json!({"scope": scope.to_string(), "error": err.message})),
            );
        }
    }

    pub async fn run(&self, request: RunRequest) -> RunReport {
        let run_id = Uuid::new_v4();
        let scope = HistoryScope::for_target(request.target.as_ref().map(|t| t.name.as_str()));
        let mut log = ExecutionLog::new();
        let mut calls = 0usize;

        self.logger.info(
            "Run started",
            Some(&serde_json::json!({
                "run_id": run_id,
                "scope": scope.to_string(),
                "mode": request.mode,
            })),
        );

        let terminal = loop {
            if calls >= self.max_steps {
                let reason = format!("step limit of {} reached", self.max_steps);
                self.remember(&scope, HistoryRecord::skipped(&request.user_text, "", &reason));
                break Terminal::Aborted(reason, None);
            }
            calls += 1;
            let generation = GenerationRequest {
                system_context: request.system_context.clone(),
                history_context: request.history_context.clone(),
                execution_log: log.clone(),
                user_text: request.user_text.clone(),
                mode: request.mode,
            };
            let plan = match self
                .generator
                .generate(&generation)
                .await
                .and_then(|raw| parse_plan(&raw, request.mode))
            {
                Ok(plan) => plan,
                Err(err) => {
                    let reason = format!("generation failed: {}", err.message);
                    self.remember(&scope, HistoryRecord::skipped(&request.user_text, "", &reason));
                    break Terminal::Aborted(reason, Some(err));
                }
            };
            match self.step(&request, &scope, &plan, &mut log).await {
                Ok(()) if plan.continues() => continue,
                Ok(()) => break Terminal::Done,
                Err(terminal) => break terminal,
            }
        };

        let (status, error) = match terminal {
            Terminal::Done => (RunStatus::Done, None),
            Terminal::Aborted(reason, error) => (RunStatus::Aborted { reason }, error),
        };
        self.logger.info(
            "Run finished",
            Some(&serde_json::json!({
                "run_id": run_id,
                "steps": log.len(),
                "generation_calls": calls,
                "status": status,
            })),
        );
        RunReport {
            run_id,
            target: request.target.map(|t| t.name),
            status,
            log,
            generation_calls: calls,
            error,
        }
    }

    async fn step(
        &self,
        request: &RunRequest,
        scope: &HistoryScope,
        plan: &StepPlan,
        log: &mut ExecutionLog,
    ) -> Result<(), Terminal> {
        let prompt = request.user_text.as_str();
        let generated = match plan {
            StepPlan::Abort { reason } => {
                self.remember(scope, HistoryRecord::skipped(prompt, "", reason));
                return Err(Terminal::Aborted(reason.clone(), None));
            }
            StepPlan::Single { command, .. } | StepPlan::Multi { command, .. } => command.clone(),
        };

        let decision = self
            .confirmer
            .confirm(Proposal {
                command: &generated,
                reasoning: plan.reasoning(),
                target: request.target.as_ref(),
                step: log.len() + 1,
            })
            .await;
        let command = match decision {
            Ok(Decision::Execute) => generated.clone(),
            Ok(Decision::Edit(edited)) if !edited.trim().is_empty() => edited.trim().to_string(),
            Ok(Decision::Edit(_)) | Ok(Decision::Skip) => {
                self.remember(
                    scope,
                    HistoryRecord::skipped(prompt, &generated, "declined").with_generated(&generated),
                );
                return Err(Terminal::Aborted("declined".to_string(), None));
            }
            Err(err) => {
                self.remember(
                    scope,
                    HistoryRecord::skipped(prompt, &generated, &err.message).with_generated(&generated),
                );
                return Err(Terminal::Aborted(err.message.clone(), Some(err)));
            }
        };

        if let Some(builtin) = detect_builtin(&command) {
            let reason = format!(
                "`{}` is a shell built-in and must be run in your own shell",
                builtin
            );
            self.remember(
                scope,
                HistoryRecord::skipped(prompt, &command, &reason).with_generated(&generated),
            );
            return Err(Terminal::Aborted(reason, None));
        }

        let options = RunOptions {
            timeout: None,
            observer: request.observer.clone(),
        };
        let (exit_code, output) = match self
            .runner
            .run(&command, request.target.as_ref(), options)
            .await
        {
            Ok(outcome) => (outcome.exit_code, outcome.output),
            Err(err) if feeds_back_as_step(&err) => {
                self.logger.warn(
                    "Connection failure fed back as a failed step",
                    Some(&serde_json::json!({"kind": err.code, "error": err.message})),
                );
                (SSH_CONNECTION_EXIT_CODE, err.message)
            }
            Err(err) => {
                self.logger.error(
                    "Step could not run",
                    Some(&serde_json::json!({"kind": err.code, "error": err.message})),
                );
                self.remember(
                    scope,
                    HistoryRecord::skipped(prompt, &command, &err.message).with_generated(&generated),
                );
                return Err(Terminal::Aborted(err.message.clone(), Some(err)));
            }
        };
        let step = log.record(&command, exit_code, &output);
        self.logger.debug(
            "Step recorded",
            Some(&serde_json::json!({"index": step.index, "exit_code": step.exit_code})),
        );
        self.remember(
            scope,
            HistoryRecord::executed(prompt, &command, exit_code, output).with_generated(&generated),
        );
        Ok(())
    }
}
