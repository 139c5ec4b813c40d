use crate::errors::AppError;
use crate::models::RemoteTarget;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PASSWORD_ENV: &str = "SHELLCRAFT_SSH_PASSWORD";

#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn password_for(&self, target: &RemoteTarget) -> Result<String, AppError>;
}

pub struct StaticSecretProvider {
    secret: Option<String>,
    requests: AtomicUsize,
}

impl StaticSecretProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }

    pub fn empty() -> Self {
        Self {
            secret: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn password_for(&self, target: &RemoteTarget) -> Result<String, AppError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.secret.clone().ok_or_else(|| {
            AppError::cancelled(format!("No password available for {}", target.destination()))
                .with_hint(format!("Set {} or run interactively.", PASSWORD_ENV))
        })
    }
}

#[derive(Default)]
pub struct TtySecretProvider;

impl TtySecretProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretProvider for TtySecretProvider {
    async fn password_for(&self, target: &RemoteTarget) -> Result<String, AppError> {
        if !std::io::stdin().is_terminal() {
            return Err(AppError::cancelled(format!(
                "Cannot prompt for the password of {} without a terminal",
                target.destination()
            ))
            .with_hint(format!("Set {} for non-interactive use.", PASSWORD_ENV)));
        }
        let prompt = format!("Password for {}: ", target.destination());
        tokio::task::spawn_blocking(move || read_masked(&prompt))
            .await
            .map_err(|err| AppError::internal(format!("Password prompt failed: {}", err)))?
    }
}

fn read_masked(prompt: &str) -> Result<String, AppError> {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}", prompt);
    let _ = stderr.flush();
    terminal::enable_raw_mode()
        .map_err(|err| AppError::internal(format!("Failed to enter raw mode: {}", err)))?;
    let result = read_keys(&mut stderr);
    let _ = terminal::disable_raw_mode();
    let _ = write!(stderr, "\r\n");
    let _ = stderr.flush();
    result
}

fn read_keys(out: &mut impl Write) -> Result<String, AppError> {
    let mut secret = String::new();
    loop {
        let event = event::read()
            .map_err(|err| AppError::internal(format!("Failed to read key: {}", err)))?;
        let Event::Key(key) = event else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(secret),
            KeyCode::Esc => return Err(AppError::cancelled("Password entry cancelled")),
            KeyCode::Char('c') | KeyCode::Char('d')
                if key.modifiers.contains(KeyModifiers::CONTROL) =>
            {
                return Err(AppError::cancelled("Password entry cancelled"));
            }
            KeyCode::Backspace => {
                if secret.pop().is_some() {
                    let _ = write!(out, "\u{8} \u{8}");
                    let _ = out.flush();
                }
            }
            KeyCode::Char(c) => {
                secret.push(c);
                let _ = write!(out, "*");
                let _ = out.flush();
            }
            _ => {}
        }
    }
}
