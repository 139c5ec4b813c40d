use crate::constants::generation::TIMEOUT_REQUEST_MS;
use crate::constants::limits::MAX_CONTEXT_OUTPUT_BYTES;
use crate::errors::AppError;
use crate::models::ExecutionLog;
use crate::services::logger::Logger;
use crate::services::plan::PlanMode;
use crate::services::settings::Settings;
use crate::utils::text::{tail_for_context, truncate_utf8_prefix};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

const ERROR_BODY_PREVIEW_BYTES: usize = 500;

const SINGLE_INSTRUCTIONS: &str = "Translate the request into one POSIX shell command for the described host. \
Reply with a JSON object {\"command\": string, \"reasoning\": string}. \
Use an empty command when the request cannot be done safely.";

const MULTI_INSTRUCTIONS: &str = "Solve the request step by step on the described host. \
Reply with a JSON object {\"command\": string, \"continue\": bool, \"reasoning\": string, \"next_step_hint\": string}. \
Set continue to true when another command is needed after seeing this one's result. \
Use an empty command with continue false to stop.";

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system_context: String,
    pub history_context: String,
    pub execution_log: ExecutionLog,
    pub user_text: String,
    pub mode: PlanMode,
}

impl GenerationRequest {
    pub fn render_prompt(&self) -> String {
        let mut sections = vec![format!("Request: {}", self.user_text.trim())];
        if !self.system_context.trim().is_empty() {
            sections.push(format!("Host:\n{}", self.system_context.trim()));
        }
        if !self.history_context.trim().is_empty() {
            sections.push(format!("Recent activity:\n{}", self.history_context.trim()));
        }
        if !self.execution_log.is_empty() {
            let steps: Vec<String> = self
                .execution_log
                .steps()
                .iter()
                .map(|step| {
                    format!(
                        "Step {}: `{}` exited {}\n{}",
                        step.index,
                        step.command,
                        step.exit_code,
                        tail_for_context(&step.output, MAX_CONTEXT_OUTPUT_BYTES)
                    )
                })
                .collect();
            sections.push(format!("Steps so far:\n{}", steps.join("\n")));
        }
        sections.join("\n\n")
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError>;
}

pub struct HttpGenerationService {
    logger: Logger,
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
}

fn map_reqwest_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        return AppError::generation("Generation request timed out");
    }
    AppError::generation(format!("Generation request failed: {}", err))
}

fn chat_endpoint(base: &str) -> Result<Url, AppError> {
    let mut normalized = base.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let base = Url::parse(&normalized)
        .map_err(|err| AppError::invalid_params(format!("Invalid api_base_url: {}", err)))?;
    base.join("chat/completions")
        .map_err(|err| AppError::invalid_params(format!("Invalid api_base_url: {}", err)))
}

impl HttpGenerationService {
    pub fn new(logger: Logger, settings: &Settings) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(TIMEOUT_REQUEST_MS))
            .build()
            .map_err(|err| AppError::internal(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self {
            logger: logger.child("generation"),
            client,
            endpoint: chat_endpoint(&settings.api_base_url)?,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AppError> {
        let Some(api_key) = self.api_key.as_ref() else {
            return Err(AppError::invalid_params("No API key configured for generation")
                .with_hint("Set SHELLCRAFT_API_KEY or OPENAI_API_KEY."));
        };
        let instructions = match request.mode {
            PlanMode::Single => SINGLE_INSTRUCTIONS,
            PlanMode::Multi => MULTI_INSTRUCTIONS,
        };
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": instructions},
                {"role": "user", "content": request.render_prompt()},
            ],
        });
        self.logger.debug(
            "Requesting plan",
            Some(&serde_json::json!({
                "model": self.model,
                "mode": request.mode,
                "steps": request.execution_log.len(),
            })),
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(AppError::generation(format!(
                "Generation service returned HTTP {}",
                status.as_u16()
            ))
            .with_details(serde_json::json!({
                "status": status.as_u16(),
                "body": truncate_utf8_prefix(&text, ERROR_BODY_PREVIEW_BYTES),
            })));
        }
        let parsed: Value = serde_json::from_str(&text).map_err(|err| {
            AppError::generation(format!("Generation service returned invalid JSON: {}", err))
        })?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::generation("Generation response had no message content"))
    }
}
