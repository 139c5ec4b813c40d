use crate::errors::AppError;
use crate::models::RemoteTarget;
use async_trait::async_trait;
use std::io::{BufRead, IsTerminal, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Execute,
    Edit(String),
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct Proposal<'a> {
    pub command: &'a str,
    pub reasoning: Option<&'a str>,
    pub target: Option<&'a RemoteTarget>,
    pub step: usize,
}

impl Proposal<'_> {
    fn location(&self) -> String {
        match self.target {
            Some(target) => target.name.clone(),
            None => "local".to_string(),
        }
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, proposal: Proposal<'_>) -> Result<Decision, AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct AutoConfirm {
    echo: bool,
}

impl AutoConfirm {
    pub fn new() -> Self {
        Self { echo: false }
    }

    pub fn echoing() -> Self {
        Self { echo: true }
    }
}

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, proposal: Proposal<'_>) -> Result<Decision, AppError> {
        if self.echo {
            eprintln!("[{}] $ {}", proposal.location(), proposal.command);
        }
        Ok(Decision::Execute)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TtyConfirm;

impl TtyConfirm {
    pub fn new() -> Self {
        Self
    }
}

fn read_answer(prompt: &str) -> Result<Option<String>, AppError> {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}", prompt);
    let _ = stderr.flush();
    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| AppError::internal(format!("Failed to read answer: {}", err)))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
}

fn ask(
    command: String,
    reasoning: Option<String>,
    location: String,
    step: usize,
) -> Result<Decision, AppError> {
    let mut stderr = std::io::stderr();
    if let Some(reasoning) = reasoning.filter(|r| !r.trim().is_empty()) {
        let _ = writeln!(stderr, "# {}", reasoning.trim());
    }
    let _ = writeln!(stderr, "[{} step {}] $ {}", location, step, command);
    loop {
        let Some(answer) = read_answer("Run it? [Y/n/e(dit)] ")? else {
            return Err(AppError::cancelled("Input closed before confirmation"));
        };
        match answer.trim().to_lowercase().as_str() {
            "" | "y" | "yes" => return Ok(Decision::Execute),
            "n" | "no" => return Ok(Decision::Skip),
            "e" | "edit" => {
                let Some(edited) = read_answer("Command: ")? else {
                    return Err(AppError::cancelled("Input closed while editing"));
                };
                let edited = edited.trim();
                if edited.is_empty() || edited == command {
                    return Ok(Decision::Execute);
                }
                return Ok(Decision::Edit(edited.to_string()));
            }
            _ => continue,
        }
    }
}

pub async fn confirm_all(question: &str) -> Result<bool, AppError> {
    if !std::io::stdin().is_terminal() {
        return Err(AppError::cancelled("Confirmation needs a terminal")
            .with_hint("Pass --yes or set SHELLCRAFT_AUTO_CONFIRM=1."));
    }
    let prompt = format!("{} [y/N] ", question);
    let answer = tokio::task::spawn_blocking(move || read_answer(&prompt))
        .await
        .map_err(|err| AppError::internal(format!("Confirmation prompt failed: {}", err)))??;
    Ok(matches!(
        answer.as_deref().map(|a| a.trim().to_lowercase()).as_deref(),
        Some("y") | Some("yes")
    ))
}

#[async_trait]
impl Confirmer for TtyConfirm {
    async fn confirm(&self, proposal: Proposal<'_>) -> Result<Decision, AppError> {
        if !std::io::stdin().is_terminal() {
            return Err(AppError::cancelled("Confirmation needs a terminal")
                .with_hint("Pass --yes or set SHELLCRAFT_AUTO_CONFIRM=1."));
        }
        let command = proposal.command.to_string();
        let reasoning = proposal.reasoning.map(str::to_string);
        let location = proposal.location();
        let step = proposal.step;
        tokio::task::spawn_blocking(move || ask(command, reasoning, location, step))
            .await
            .map_err(|err| AppError::internal(format!("Confirmation prompt failed: {}", err)))?
    }
}
