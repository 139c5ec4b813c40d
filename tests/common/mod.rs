#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use shellcraft::errors::AppError;
use shellcraft::managers::executor::{CommandRunner, RunOptions, StepOutcome};
use shellcraft::models::RemoteTarget;
use shellcraft::services::confirm::{Confirmer, Decision, Proposal};
use shellcraft::services::generation::{GenerationRequest, GenerationService};
use shellcraft::services::logger::Logger;
use shellcraft::services::settings::Settings;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub fn tmp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn settings_in(dir: &std::path::Path) -> Settings {
    Settings::with_base_dir(dir)
}

pub fn logger() -> Logger {
    Logger::new("test")
}

type Handler = dyn Fn(&str, Option<&RemoteTarget>) -> Result<StepOutcome, AppError> + Send + Sync;

pub struct FakeRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<(Option<String>, String)>>,
}

impl FakeRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, Option<&RemoteTarget>) -> Result<StepOutcome, AppError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(output: &str) -> Self {
        let output = output.to_string();
        Self::new(move |_, _| Ok(outcome(0, &output)))
    }

    pub fn calls(&self) -> Vec<(Option<String>, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands_for(&self, target: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(name, _)| name.as_deref() == Some(target))
            .map(|(_, command)| command)
            .collect()
    }
}

pub fn outcome(exit_code: i32, output: &str) -> StepOutcome {
    StepOutcome {
        exit_code,
        output: output.to_string(),
        timed_out: false,
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        command: &str,
        target: Option<&RemoteTarget>,
        _options: RunOptions,
    ) -> Result<StepOutcome, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.map(|t| t.name.clone()), command.to_string()));
        (self.handler)(command, target)
    }
}

pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, AppError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(response.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: AppError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(vec![Err(err)])),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback
            .clone()
            .ok_or_else(|| AppError::generation("no scripted response left"))
    }
}

type Responder = dyn Fn(&GenerationRequest) -> Result<String, AppError> + Send + Sync;

pub struct FnGenerator {
    responder: Box<Responder>,
    calls: Mutex<usize>,
}

impl FnGenerator {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, AppError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl GenerationService for FnGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        *self.calls.lock().unwrap() += 1;
        (self.responder)(request)
    }
}

pub struct FixedConfirmer {
    decision: Decision,
    seen: Mutex<Vec<String>>,
}

impl FixedConfirmer {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn confirm(&self, proposal: Proposal<'_>) -> Result<Decision, AppError> {
        self.seen.lock().unwrap().push(proposal.command.to_string());
        Ok(self.decision.clone())
    }
}
