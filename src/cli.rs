use crate::app::App;
use crate::constants::history::DEFAULT_CONTEXT_RECORDS;
use crate::errors::AppError;
use crate::managers::batch::{BatchPlan, BatchResult};
use crate::managers::orchestrator::{RunReport, RunRequest, RunStatus};
use crate::managers::process::{OutputChunk, OutputObserver, StreamKind};
use crate::models::AuthMode;
use crate::services::confirm::{confirm_all, AutoConfirm, Confirmer, TtyConfirm};
use crate::services::history::HistoryScope;
use crate::services::hook::{build_record, hook_script, HookShell};
use crate::services::plan::PlanMode;
use crate::services::registry::NewRemote;
use crate::services::shell_history::{format_shell_history, HistorySource};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shellcraft")]
#[command(author, version, about = "Turn plain-language requests into shell commands, locally or over SSH")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a command for a request and run it
    Ask {
        /// What you want done
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Run on this registered remote instead of locally
        #[arg(short, long)]
        remote: Option<String>,
        /// Let the model chain several commands, feeding back each result
        #[arg(short, long)]
        multi: bool,
        /// Run generated commands without asking
        #[arg(short, long)]
        yes: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one request on several remotes at once
    Batch {
        /// Remote names (repeat or comma-separate)
        #[arg(short, long = "remote", required = true, value_delimiter = ',')]
        remotes: Vec<String>,
        /// What you want done on every remote
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Run without asking
        #[arg(short, long)]
        yes: bool,
        /// Only show the generated commands
        #[arg(long)]
        dry_run: bool,
        /// Print plans and results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage registered remotes
    #[command(subcommand)]
    Remote(RemoteCommand),

    /// Show or clear request history
    History {
        #[arg(short, long)]
        remote: Option<String>,
        #[arg(short, long, default_value_t = DEFAULT_CONTEXT_RECORDS)]
        limit: usize,
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        json: bool,
    },

    /// Show or clear recorded shell activity
    ShellHistory {
        #[arg(short, long)]
        remote: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        clear: bool,
    },

    /// Shell integration
    #[command(subcommand)]
    Hook(HookCommand),
}

#[derive(Subcommand)]
pub enum RemoteCommand {
    /// Register a remote host
    Add {
        name: String,
        #[arg(long)]
        host: String,
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        port: Option<u32>,
        /// key, password or agent
        #[arg(long, default_value = "agent")]
        auth: AuthMode,
        /// Private key for key auth
        #[arg(short, long)]
        key: Option<String>,
        /// Directory every command starts in
        #[arg(short, long)]
        workdir: Option<String>,
    },
    /// List registered remotes
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one remote
    Show { name: String },
    /// Remove a remote with its history, caches and connection
    Remove { name: String },
    /// Set or clear the working directory of a remote
    Workdir {
        name: String,
        path: Option<String>,
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },
    /// Close the shared connection to a remote
    Close { name: String },
    /// Check that a remote answers
    Test { name: String },
    /// Show system information of a remote
    Info {
        name: String,
        /// Probe again even if the cached snapshot is fresh
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Subcommand)]
pub enum HookCommand {
    /// Append one finished command to the shell activity log
    Record {
        #[arg(long)]
        cmd: String,
        #[arg(long, allow_negative_numbers = true)]
        exit: i32,
    },
    /// Print the hook snippet for a shell profile
    Script { shell: HookShell },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn streaming_observer() -> OutputObserver {
    Arc::new(|chunk: &OutputChunk| match chunk.stream {
        StreamKind::Stdout => {
            let mut out = std::io::stdout();
            let _ = out.write_all(chunk.text.as_bytes());
            let _ = out.flush();
        }
        StreamKind::Stderr => {
            let mut err = std::io::stderr();
            let _ = err.write_all(chunk.text.as_bytes());
            let _ = err.flush();
        }
    })
}

fn confirmer(app: &App, yes: bool) -> Arc<dyn Confirmer> {
    if yes || app.settings.auto_confirm {
        Arc::new(AutoConfirm::echoing())
    } else {
        Arc::new(TtyConfirm::new())
    }
}

fn report_exit_code(report: &RunReport) -> i32 {
    match &report.status {
        RunStatus::Done => report.last_exit_code().unwrap_or(0),
        RunStatus::Aborted { .. } => 1,
    }
}

pub async fn run(app: &App, command: Commands) -> Result<i32, AppError> {
    match command {
        Commands::Ask {
            prompt,
            remote,
            multi,
            yes,
            json,
        } => {
            let target = match remote.as_deref() {
                Some(name) => Some(app.registry.get(name)?),
                None => None,
            };
            let (system, history) = app.build_context(target.as_ref()).await;
            let mode = if multi { PlanMode::Multi } else { PlanMode::Single };
            let request = RunRequest::new(prompt.join(" "), mode)
                .on(target)
                .with_context(system, history)
                .with_observer((!json).then(streaming_observer));
            let report = app
                .orchestrator(app.generator()?, confirmer(app, yes))
                .run(request)
                .await;
            if json {
                print_json(&report)?;
            } else if let RunStatus::Aborted { reason } = &report.status {
                eprintln!("shellcraft: aborted: {}", reason);
                if let Some(hint) = report.error.as_ref().and_then(|e| e.hint.as_ref()) {
                    eprintln!("hint: {}", hint);
                }
            }
            Ok(report_exit_code(&report))
        }
        Commands::Batch {
            remotes,
            prompt,
            yes,
            dry_run,
            json,
        } => {
            let batch = app.batch(app.generator()?);
            let plans = batch.plan_batch(&remotes, &prompt.join(" ")).await?;
            if !json {
                print_plans(&plans);
            }
            if dry_run {
                if json {
                    print_json(&plans)?;
                }
                return Ok(0);
            }
            if !plans.iter().any(BatchPlan::is_runnable) {
                if json {
                    print_json(&plans)?;
                }
                return Ok(1);
            }
            if !(yes || app.settings.auto_confirm) && !confirm_all("Run these commands?").await? {
                return Ok(1);
            }
            let results = batch.execute_batch(plans).await;
            if json {
                print_json(&results)?;
            } else {
                print_results(&results);
            }
            Ok(if results.iter().all(BatchResult::succeeded) { 0 } else { 1 })
        }
        Commands::Remote(command) => run_remote(app, command).await,
        Commands::History {
            remote,
            limit,
            clear,
            json,
        } => {
            let scope = scope_for(app, remote.as_deref())?;
            if clear {
                app.history.clear(&scope)?;
                println!("Cleared {} history", scope);
                return Ok(0);
            }
            if json {
                let records = app.history.list(&scope);
                let start = records.len().saturating_sub(limit);
                print_json(&records[start..].to_vec())?;
                return Ok(0);
            }
            let text = app.history.format(&scope, limit);
            if text.is_empty() {
                println!("No history for {}", scope);
            } else {
                println!("{}", text);
            }
            Ok(0)
        }
        Commands::ShellHistory {
            remote,
            limit,
            clear,
        } => {
            let limit = limit.unwrap_or(app.settings.shell_history_limit);
            match remote.as_deref() {
                Some(name) => {
                    let target = app.registry.get(name)?;
                    if clear {
                        app.shell_history.clear_remote_cache(&target.name)?;
                        println!("Cleared cached shell history for {}", target.name);
                        return Ok(0);
                    }
                    let fetched = app
                        .shell_history
                        .fetch_remote(app.executor.as_ref(), &target, limit)
                        .await;
                    match fetched.source {
                        HistorySource::Empty => println!("No shell history for {}", target.name),
                        HistorySource::Cached => {
                            eprintln!("(cached snapshot; {} did not answer)", target.name);
                            println!("{}", format_shell_history(&fetched.items));
                        }
                        HistorySource::Live => println!("{}", format_shell_history(&fetched.items)),
                    }
                }
                None => {
                    if clear {
                        app.shell_history.clear_local()?;
                        println!("Cleared local shell history");
                        return Ok(0);
                    }
                    let items = app.shell_history.read_local(limit);
                    if items.is_empty() {
                        println!("No shell history recorded");
                    } else {
                        println!("{}", format_shell_history(&items));
                    }
                }
            }
            Ok(0)
        }
        Commands::Hook(HookCommand::Record { cmd, exit }) => {
            app.shell_history.append_local(&build_record(&cmd, exit)?)?;
            Ok(0)
        }
        Commands::Hook(HookCommand::Script { shell }) => {
            print!("{}", hook_script(shell));
            Ok(0)
        }
    }
}

fn scope_for(app: &App, remote: Option<&str>) -> Result<HistoryScope, AppError> {
    match remote {
        Some(name) => Ok(HistoryScope::Remote(app.registry.get(name)?.name)),
        None => Ok(HistoryScope::Local),
    }
}

async fn run_remote(app: &App, command: RemoteCommand) -> Result<i32, AppError> {
    match command {
        RemoteCommand::Add {
            name,
            host,
            user,
            port,
            auth,
            key,
            workdir,
        } => {
            let target = app.registry.add(NewRemote {
                name,
                host,
                user,
                port,
                auth_mode: auth,
                key_path: key,
                work_dir: workdir,
            })?;
            println!("Added {}", target);
        }
        RemoteCommand::List { json } => {
            let remotes = app.registry.list();
            if json {
                print_json(&remotes)?;
            } else if remotes.is_empty() {
                println!("No remotes registered");
            } else {
                for target in remotes {
                    let state = if app.connections.is_active(&target) {
                        " [connected]"
                    } else {
                        ""
                    };
                    println!("{} {}{}", target, target.auth_mode, state);
                }
            }
        }
        RemoteCommand::Show { name } => {
            let target = app.registry.get(&name)?;
            print_json(&serde_json::json!({
                "remote": target,
                "connection": format!("{:?}", app.connections.state(&target)).to_lowercase(),
                "control_path": app.connections.control_path(&target),
            }))?;
        }
        RemoteCommand::Remove { name } => {
            let removed = app.remove_remote(&name).await?;
            println!("Removed {}", removed.name);
        }
        RemoteCommand::Workdir { name, path, clear } => {
            if path.is_none() && !clear {
                let target = app.registry.get(&name)?;
                println!("{}", target.work_dir.as_deref().unwrap_or("(not set)"));
                return Ok(0);
            }
            let updated = app.registry.set_work_dir(&name, path.as_deref())?;
            match updated.work_dir.as_deref() {
                Some(dir) => println!("{} now starts in {}", updated.name, dir),
                None => println!("{} has no working directory", updated.name),
            }
        }
        RemoteCommand::Close { name } => {
            let target = app.registry.get(&name)?;
            if app.connections.close(&target).await? {
                println!("Closed connection to {}", target.name);
            } else {
                println!("No open connection to {}", target.name);
            }
        }
        RemoteCommand::Test { name } => {
            app.test_remote(&name).await?;
            println!("{} is reachable", name.trim());
        }
        RemoteCommand::Info { name, refresh } => {
            let target = app.registry.get(&name)?;
            let info = app
                .sysinfo
                .remote(app.executor.as_ref(), &target, refresh)
                .await?;
            println!("{}", info.summary());
            println!("Collected: {}", info.collected_at);
        }
    }
    Ok(0)
}

fn print_plans(plans: &[BatchPlan]) {
    for plan in plans {
        match (&plan.command, &plan.error) {
            (_, Some(err)) => eprintln!("[{}] error: {}", plan.target.name, err.message),
            (Some(command), None) => println!("[{}] $ {}", plan.target.name, command),
            (None, None) => eprintln!("[{}] no command", plan.target.name),
        }
    }
}

fn print_results(results: &[BatchResult]) {
    for result in results {
        match &result.error {
            Some(err) => {
                eprintln!("== {} failed: {}", result.target, err.message);
                if let Some(hint) = err.hint.as_ref() {
                    eprintln!("   hint: {}", hint);
                }
            }
            None => {
                println!(
                    "== {} (exit {})",
                    result.target,
                    result.exit_code.unwrap_or_default()
                );
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
            }
        }
    }
}
