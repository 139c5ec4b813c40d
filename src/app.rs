use crate::constants::history::DEFAULT_CONTEXT_RECORDS;
use crate::errors::AppError;
use crate::managers::batch::BatchOrchestrator;
use crate::managers::connection::ConnectionManager;
use crate::managers::executor::{CommandRunner, RunOptions, StepExecutor, StepOutcome};
use crate::managers::orchestrator::Orchestrator;
use crate::models::RemoteTarget;
use crate::services::confirm::Confirmer;
use crate::services::generation::{GenerationService, HttpGenerationService};
use crate::services::history::{HistoryScope, HistoryStore};
use crate::services::logger::Logger;
use crate::services::registry::RemoteRegistry;
use crate::services::secret::SecretProvider;
use crate::services::settings::Settings;
use crate::services::shell_history::{format_shell_history, ShellHistoryStore};
use crate::services::sysinfo::SysInfoService;
use crate::utils::paths::{ensure_private_dir, StoragePaths};
use std::sync::Arc;
use std::time::Duration;

const CONNECTION_TEST_COMMAND: &str = "echo ok";

pub struct App {
    pub settings: Settings,
    pub logger: Logger,
    pub paths: StoragePaths,
    pub registry: RemoteRegistry,
    pub history: HistoryStore,
    pub shell_history: ShellHistoryStore,
    pub sysinfo: SysInfoService,
    pub connections: Arc<ConnectionManager>,
    pub executor: Arc<StepExecutor>,
}

impl App {
    pub fn initialize(settings: Settings, secrets: Arc<dyn SecretProvider>) -> Result<Self, AppError> {
        let logger = Logger::new("shellcraft");
        let paths = settings.paths();
        ensure_private_dir(paths.base_dir()).map_err(|err| {
            AppError::persistence(format!(
                "Failed to create {}: {}",
                paths.base_dir().display(),
                err
            ))
        })?;

        let registry = RemoteRegistry::new(logger.clone(), paths.remotes_path())?;
        let history = HistoryStore::new(logger.clone(), paths.clone(), settings.history_retention);
        let shell_history = ShellHistoryStore::new(logger.clone(), paths.clone());
        let sysinfo = SysInfoService::new(logger.clone(), paths.clone(), settings.sysinfo_ttl_ms);
        let connections = Arc::new(ConnectionManager::new(logger.clone(), &settings, secrets));
        let executor = Arc::new(StepExecutor::new(
            logger.clone(),
            &settings,
            connections.clone(),
        ));

        logger.debug(
            "Application initialized",
            Some(&serde_json::json!({
                "base_dir": paths.base_dir(),
                "remotes": registry.list().len(),
            })),
        );

        Ok(Self {
            settings,
            logger,
            paths,
            registry,
            history,
            shell_history,
            sysinfo,
            connections,
            executor,
        })
    }

    pub fn generator(&self) -> Result<Arc<dyn GenerationService>, AppError> {
        Ok(Arc::new(HttpGenerationService::new(
            self.logger.clone(),
            &self.settings,
        )?))
    }

    pub fn orchestrator(
        &self,
        generator: Arc<dyn GenerationService>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.logger.clone(),
            generator,
            self.executor.clone(),
            confirmer,
            self.history.clone(),
            self.settings.max_steps,
        )
    }

    pub fn batch(&self, generator: Arc<dyn GenerationService>) -> BatchOrchestrator {
        BatchOrchestrator::new(
            self.logger.clone(),
            self.registry.clone(),
            generator,
            self.executor.clone(),
            self.sysinfo.clone(),
            self.shell_history.clone(),
            self.history.clone(),
            self.settings.batch_concurrency,
            self.settings.shell_history_limit,
        )
    }

    // Returns (system context, history context) for one generation request.
    pub async fn build_context(&self, target: Option<&RemoteTarget>) -> (String, String) {
        let runner: &dyn CommandRunner = self.executor.as_ref();
        let scope = HistoryScope::for_target(target.map(|t| t.name.as_str()));
        let (system, shell) = match target {
            Some(target) => {
                let system = match self.sysinfo.remote(runner, target, false).await {
                    Ok(info) => info.summary(),
                    Err(err) => {
                        self.logger.warn(
                            "System info unavailable",
                            Some(&serde_json::json!({"remote": target.name, "error": err.message})),
                        );
                        String::new()
                    }
                };
                let shell = self
                    .shell_history
                    .fetch_remote(runner, target, self.settings.shell_history_limit)
                    .await
                    .items;
                (system, shell)
            }
            None => (
                self.sysinfo.local(runner).await.summary(),
                self.shell_history.read_local(self.settings.shell_history_limit),
            ),
        };
        let mut history = self.history.format(&scope, DEFAULT_CONTEXT_RECORDS);
        if !shell.is_empty() {
            if !history.is_empty() {
                history.push_str("\n\n");
            }
            history.push_str(&format_shell_history(&shell));
        }
        (system, history)
    }

    pub async fn test_remote(&self, name: &str) -> Result<StepOutcome, AppError> {
        let target = self.registry.get(name)?;
        let outcome = self
            .executor
            .run(
                CONNECTION_TEST_COMMAND,
                Some(&target),
                RunOptions::with_timeout(self.settings.connect_timeout() + Duration::from_secs(5)),
            )
            .await?;
        if !outcome.succeeded() {
            return Err(AppError::unreachable(format!(
                "Connection test on '{}' exited with {}",
                target.name, outcome.exit_code
            ))
            .with_details(serde_json::json!({"output": outcome.output})));
        }
        Ok(outcome)
    }

    pub async fn remove_remote(&self, name: &str) -> Result<RemoteTarget, AppError> {
        let removed = self.registry.remove(name)?;
        if let Err(err) = self.connections.close(&removed).await {
            self.logger.warn(
                "Connection not closed cleanly",
                Some(&serde_json::json!({"remote": removed.name, "error": err.message})),
            );
        }
        self.history.purge_remote(&removed.name)?;
        Ok(removed)
    }
}
