mod common;

use common::{logger, outcome, tmp_dir, FakeRunner, FnGenerator, ScriptedGenerator};
use shellcraft::errors::{AppError, ErrorKind};
use shellcraft::managers::batch::BatchOrchestrator;
use shellcraft::managers::executor::{CommandRunner, StepOutcome};
use shellcraft::models::{AuthMode, RemoteTarget};
use shellcraft::services::generation::GenerationService;
use shellcraft::services::history::{HistoryScope, HistoryStore};
use shellcraft::services::registry::{NewRemote, RemoteRegistry};
use shellcraft::services::shell_history::ShellHistoryStore;
use shellcraft::services::sysinfo::SysInfoService;
use shellcraft::utils::paths::StoragePaths;
use std::sync::Arc;

struct Setup {
    registry: RemoteRegistry,
    sysinfo: SysInfoService,
    shell_history: ShellHistoryStore,
    history: HistoryStore,
}

fn setup(names: &[&str]) -> Setup {
    let paths = StoragePaths::new(tmp_dir("shellcraft-batch"));
    let registry = RemoteRegistry::new(logger(), paths.remotes_path()).unwrap();
    for name in names {
        registry
            .add(NewRemote {
                name: name.to_string(),
                host: format!("{}.lan", name),
                user: "ops".to_string(),
                port: None,
                auth_mode: AuthMode::Agent,
                key_path: None,
                work_dir: None,
            })
            .unwrap();
    }
    Setup {
        registry,
        sysinfo: SysInfoService::new(logger(), paths.clone(), 60 * 60 * 1000),
        shell_history: ShellHistoryStore::new(logger(), paths.clone()),
        history: HistoryStore::new(logger(), paths, 50),
    }
}

impl Setup {
    fn orchestrator(
        &self,
        generator: Arc<dyn GenerationService>,
        runner: Arc<dyn CommandRunner>,
    ) -> BatchOrchestrator {
        BatchOrchestrator::new(
            logger(),
            self.registry.clone(),
            generator,
            runner,
            self.sysinfo.clone(),
            self.shell_history.clone(),
            self.history.clone(),
            4,
            10,
        )
    }
}

fn is_probe(command: &str) -> bool {
    command.contains("uname")
}

fn is_shell_history(command: &str) -> bool {
    command.contains("tail -n")
}

fn probe_output(target: &RemoteTarget) -> String {
    let manager = if target.name.starts_with("deb") {
        "apt-get"
    } else {
        "dnf"
    };
    format!(
        "os=Linux\nkernel=6.1.0\narch=x86_64\nhostname={}\nuser=ops\nshell=/bin/bash\npackage_manager={}\n",
        target.name, manager
    )
}

// Answers the context probes; everything else goes to `task`.
fn runner_with<F>(task: F) -> FakeRunner
where
    F: Fn(&str, &RemoteTarget) -> Result<StepOutcome, AppError> + Send + Sync + 'static,
{
    FakeRunner::new(move |command, target| {
        let Some(target) = target else {
            return Err(AppError::internal("batch commands must target a remote"));
        };
        if is_probe(command) {
            return Ok(outcome(0, &probe_output(target)));
        }
        if is_shell_history(command) {
            return Ok(outcome(0, ""));
        }
        task(command, target)
    })
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn task_commands(runner: &FakeRunner, target: &str) -> Vec<String> {
    runner
        .commands_for(target)
        .into_iter()
        .filter(|c| !is_probe(c) && !is_shell_history(c))
        .collect()
}

#[tokio::test]
async fn unknown_remotes_fail_before_any_work() {
    let s = setup(&["web"]);
    let generator = Arc::new(ScriptedGenerator::repeating(r#"{"command": "uptime"}"#));
    let runner = Arc::new(FakeRunner::succeeding(""));
    let batch = s.orchestrator(generator.clone(), runner.clone());

    let err = batch
        .plan_batch(&names(&["web", "ghost", "phantom"]), "uptime")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.message.contains("ghost"));
    assert!(err.message.contains("phantom"));
    assert_eq!(generator.calls(), 0);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn one_failure_does_not_stop_the_others() {
    let s = setup(&["alpha", "beta"]);
    let generator = Arc::new(ScriptedGenerator::repeating(
        r#"{"command": "systemctl restart app", "reasoning": "restart"}"#,
    ));
    let runner = Arc::new(runner_with(|_, target| {
        if target.name == "alpha" {
            Err(AppError::unreachable("Cannot reach alpha.lan:22"))
        } else {
            Ok(outcome(0, "restarted"))
        }
    }));
    let batch = s.orchestrator(generator, runner.clone());

    let plans = batch
        .plan_batch(&names(&["beta", "alpha"]), "restart the app")
        .await
        .unwrap();
    assert!(plans.iter().all(|p| p.is_runnable()));
    let results = batch.execute_batch(plans).await;

    let order: Vec<&str> = results.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(order, vec!["beta", "alpha"]);
    assert!(results[0].succeeded());
    assert_eq!(results[0].output, "restarted");
    assert_eq!(
        results[1].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Unreachable)
    );
    assert_eq!(results[1].exit_code, None);

    let beta = s.history.list(&HistoryScope::Remote("beta".to_string()));
    assert_eq!(beta.len(), 1);
    assert!(beta[0].executed);
    let alpha = s.history.list(&HistoryScope::Remote("alpha".to_string()));
    assert_eq!(alpha.len(), 1);
    assert!(!alpha[0].executed);
    assert_eq!(alpha[0].ai_generated_command.as_deref(), Some(alpha[0].command.as_str()));
    assert!(s.history.list(&HistoryScope::Local).is_empty());
}

#[tokio::test]
async fn each_host_gets_a_command_for_its_own_system() {
    let s = setup(&["debian-1", "fedora-1"]);
    let generator = Arc::new(FnGenerator::new(|request| {
        if request.system_context.contains("apt-get") {
            Ok(r#"{"command": "apt-get install -y htop"}"#.to_string())
        } else if request.system_context.contains("dnf") {
            Ok(r#"{"command": "dnf install -y htop"}"#.to_string())
        } else {
            Err(AppError::generation("no system context"))
        }
    }));
    let runner = Arc::new(runner_with(|_, _| Ok(outcome(0, "installed"))));
    let batch = s.orchestrator(generator.clone(), runner.clone());

    let plans = batch
        .plan_batch(&names(&["debian-1", "fedora-1"]), "install htop")
        .await
        .unwrap();
    assert_eq!(generator.calls(), 2);
    assert_eq!(plans[0].command.as_deref(), Some("apt-get install -y htop"));
    assert_eq!(plans[1].command.as_deref(), Some("dnf install -y htop"));
    assert_eq!(
        plans[0].sys_info.as_ref().and_then(|i| i.package_manager.as_deref()),
        Some("apt-get")
    );

    let results = batch.execute_batch(plans).await;
    assert!(results.iter().all(|r| r.succeeded()));
    assert_eq!(task_commands(&runner, "debian-1"), vec!["apt-get install -y htop"]);
    assert_eq!(task_commands(&runner, "fedora-1"), vec!["dnf install -y htop"]);
}

#[tokio::test]
async fn probe_failures_become_plan_errors() {
    let s = setup(&["good", "down"]);
    let generator = Arc::new(ScriptedGenerator::repeating(r#"{"command": "df -h"}"#));
    let runner = Arc::new(FakeRunner::new(|command, target| {
        let target = target.map(|t| t.name.clone()).unwrap_or_default();
        if target == "down" {
            return Err(AppError::unreachable("Cannot reach down.lan:22"));
        }
        if command.contains("uname") {
            return Ok(outcome(0, "os=Linux\nuser=ops\n"));
        }
        Ok(outcome(0, ""))
    }));
    let batch = s.orchestrator(generator.clone(), runner.clone());

    let plans = batch
        .plan_batch(&names(&["good", "down"]), "disk usage")
        .await
        .unwrap();
    assert!(plans[0].is_runnable());
    assert!(!plans[1].is_runnable());
    assert_eq!(
        plans[1].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Unreachable)
    );
    assert_eq!(generator.calls(), 1);

    let results = batch.execute_batch(plans).await;
    assert!(results[0].succeeded());
    assert!(!results[1].succeeded());
    assert_eq!(runner.commands_for("down").len(), 1);
}

#[tokio::test]
async fn system_info_is_probed_once_while_fresh() {
    let s = setup(&["web"]);
    let generator = Arc::new(ScriptedGenerator::repeating(r#"{"command": "uptime"}"#));
    let runner = Arc::new(runner_with(|_, _| Ok(outcome(0, "up"))));
    let batch = s.orchestrator(generator, runner.clone());

    batch.plan_batch(&names(&["web"]), "uptime").await.unwrap();
    batch.plan_batch(&names(&["web"]), "uptime again").await.unwrap();

    let probes = runner
        .commands_for("web")
        .into_iter()
        .filter(|c| is_probe(c))
        .count();
    assert_eq!(probes, 1);
    assert_eq!(
        s.sysinfo.cached("web").map(|info| info.hostname),
        Some("web".to_string())
    );
}

#[tokio::test]
async fn empty_generations_and_builtins_are_not_run() {
    let s = setup(&["one", "two"]);
    let generator = Arc::new(FnGenerator::new(|request| {
        if request.system_context.contains("Hostname: one") {
            Ok(r#"{"command": "", "reasoning": "not applicable"}"#.to_string())
        } else {
            Ok(r#"{"command": "cd /srv/app"}"#.to_string())
        }
    }));
    let runner = Arc::new(runner_with(|_, _| Ok(outcome(0, ""))));
    let batch = s.orchestrator(generator, runner.clone());

    let plans = batch
        .plan_batch(&names(&["one", "two"]), "go to the app")
        .await
        .unwrap();
    assert_eq!(plans[0].reasoning.as_deref(), Some("not applicable"));
    assert_eq!(
        plans[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Generation)
    );

    let results = batch.execute_batch(plans).await;
    assert_eq!(
        results[1].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::InvalidParams)
    );
    assert!(task_commands(&runner, "one").is_empty());
    assert!(task_commands(&runner, "two").is_empty());

    let two = s.history.list(&HistoryScope::Remote("two".to_string()));
    assert_eq!(two.len(), 1);
    assert!(!two[0].executed);
    assert_eq!(two[0].ai_generated_command.as_deref(), Some("cd /srv/app"));
}
