use crate::constants::history::DEFAULT_CONTEXT_RECORDS;
use crate::errors::AppError;
use crate::managers::executor::{CommandRunner, RunOptions};
use crate::models::{ExecutionLog, HistoryRecord, RemoteTarget, SystemInfo};
use crate::services::generation::{GenerationRequest, GenerationService};
use crate::services::history::{HistoryScope, HistoryStore};
use crate::services::logger::Logger;
use crate::services::plan::{parse_plan, PlanMode, StepPlan};
use crate::services::registry::RemoteRegistry;
use crate::services::shell_history::{format_shell_history, ShellHistoryStore};
use crate::services::sysinfo::SysInfoService;
use crate::utils::shell::detect_builtin;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub target: RemoteTarget,
    pub user_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys_info: Option<SystemInfo>,
}

impl BatchPlan {
    fn failed(target: RemoteTarget, user_prompt: &str, error: AppError) -> Self {
        Self {
            target,
            user_prompt: user_prompt.to_string(),
            command: None,
            reasoning: None,
            error: Some(error),
            sys_info: None,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.error.is_none() && self.command.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

impl BatchResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    fn failed(target: &str, command: Option<String>, error: AppError) -> Self {
        Self {
            target: target.to_string(),
            command,
            exit_code: None,
            output: String::new(),
            timed_out: false,
            error: Some(error),
        }
    }
}

pub struct BatchOrchestrator {
    logger: Logger,
    registry: RemoteRegistry,
    generator: Arc<dyn GenerationService>,
    runner: Arc<dyn CommandRunner>,
    sysinfo: SysInfoService,
    shell_history: ShellHistoryStore,
    history: HistoryStore,
    concurrency: usize,
    shell_history_limit: usize,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        registry: RemoteRegistry,
        generator: Arc<dyn GenerationService>,
        runner: Arc<dyn CommandRunner>,
        sysinfo: SysInfoService,
        shell_history: ShellHistoryStore,
        history: HistoryStore,
        concurrency: usize,
        shell_history_limit: usize,
    ) -> Self {
        Self {
            logger: logger.child("batch"),
            registry,
            generator,
            runner,
            sysinfo,
            shell_history,
            history,
            concurrency: concurrency.max(1),
            shell_history_limit,
        }
    }

    pub async fn plan_batch(
        &self,
        target_names: &[String],
        user_prompt: &str,
    ) -> Result<Vec<BatchPlan>, AppError> {
        let targets = self.registry.resolve_all(target_names)?;
        self.logger.info(
            "Planning batch",
            Some(&serde_json::json!({"targets": targets.len(), "concurrency": self.concurrency})),
        );
        let mut planned: Vec<(usize, BatchPlan)> = stream::iter(targets.into_iter().enumerate())
            .map(|(index, target)| async move { (index, self.plan_one(target, user_prompt).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        planned.sort_by_key(|(index, _)| *index);
        Ok(planned.into_iter().map(|(_, plan)| plan).collect())
    }

    async fn plan_one(&self, target: RemoteTarget, user_prompt: &str) -> BatchPlan {
        let runner = self.runner.as_ref();
        let sys_info = match self.sysinfo.remote(runner, &target, false).await {
            Ok(info) => info,
            Err(err) => return BatchPlan::failed(target, user_prompt, err),
        };
        let shell = self
            .shell_history
            .fetch_remote(runner, &target, self.shell_history_limit)
            .await;
        let scope = HistoryScope::Remote(target.name.clone());
        let mut history_context = self.history.format(&scope, DEFAULT_CONTEXT_RECORDS);
        if !shell.items.is_empty() {
            if !history_context.is_empty() {
                history_context.push_str("\n\n");
            }
            history_context.push_str(&format_shell_history(&shell.items));
        }
        let request = GenerationRequest {
            system_context: sys_info.summary(),
            history_context,
            execution_log: ExecutionLog::new(),
            user_text: user_prompt.to_string(),
            mode: PlanMode::Single,
        };
        let plan = match self
            .generator
            .generate(&request)
            .await
            .and_then(|raw| parse_plan(&raw, PlanMode::Single))
        {
            Ok(plan) => plan,
            Err(err) => {
                let mut failed = BatchPlan::failed(target, user_prompt, err);
                failed.sys_info = Some(sys_info);
                return failed;
            }
        };
        let (command, reasoning, error) = match plan {
            StepPlan::Abort { reason } => (
                None,
                Some(reason.clone()),
                Some(AppError::generation(format!("No command generated: {}", reason))),
            ),
            StepPlan::Single { command, reasoning } => (Some(command), reasoning, None),
            StepPlan::Multi {
                command, reasoning, ..
            } => (Some(command), reasoning, None),
        };
        BatchPlan {
            target,
            user_prompt: user_prompt.to_string(),
            command,
            reasoning,
            error,
            sys_info: Some(sys_info),
        }
    }

    pub async fn execute_batch(&self, plans: Vec<BatchPlan>) -> Vec<BatchResult> {
        let mut results: Vec<(usize, BatchResult)> = stream::iter(plans.into_iter().enumerate())
            .map(|(index, plan)| async move { (index, self.execute_one(plan).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);
        let results: Vec<BatchResult> = results.into_iter().map(|(_, result)| result).collect();
        self.logger.info(
            "Batch finished",
            Some(&serde_json::json!({
                "targets": results.len(),
                "succeeded": results.iter().filter(|r| r.succeeded()).count(),
            })),
        );
        results
    }

    async fn execute_one(&self, plan: BatchPlan) -> BatchResult {
        let name = plan.target.name.clone();
        if let Some(err) = plan.error {
            return BatchResult::failed(&name, plan.command, err);
        }
        let Some(command) = plan.command else {
            return BatchResult::failed(&name, None, AppError::generation("No command generated"));
        };
        let scope = HistoryScope::Remote(name.clone());
        if let Some(builtin) = detect_builtin(&command) {
            let reason = format!(
                "`{}` is a shell built-in and must be run in your own shell",
                builtin
            );
            self.record(
                &scope,
                HistoryRecord::skipped(&plan.user_prompt, &command, &reason)
                    .with_generated(&command),
            );
            return BatchResult::failed(&name, Some(command), AppError::invalid_params(reason));
        }
        match self
            .runner
            .run(&command, Some(&plan.target), RunOptions::default())
            .await
        {
            Ok(outcome) => {
                self.record(
                    &scope,
                    HistoryRecord::executed(
                        &plan.user_prompt,
                        &command,
                        outcome.exit_code,
                        &outcome.output,
                    )
                    .with_generated(&command),
                );
                BatchResult {
                    target: name,
                    command: Some(command),
                    exit_code: Some(outcome.exit_code),
                    output: outcome.output,
                    timed_out: outcome.timed_out,
                    error: None,
                }
            }
            Err(err) => {
                self.logger.warn(
                    "Batch target failed",
                    Some(&serde_json::json!({"remote": name, "kind": err.code, "error": err.message})),
                );
                self.record(
                    &scope,
                    HistoryRecord::skipped(&plan.user_prompt, &command, &err.message)
                        .with_generated(&command),
                );
                BatchResult::failed(&name, Some(command), err)
            }
        }
    }

    fn record(&self, scope: &HistoryScope, record: HistoryRecord) {
        if let Err(err) = self.history.append(scope, record) {
            self.logger.warn(
                "History not recorded",
                Some(&serde_json::json!({"scope": scope.to_string(), "error": err.message})),
            );
        }
    }
}
