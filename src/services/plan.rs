use crate::errors::AppError;
use crate::utils::text::truncate_utf8_prefix;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const RAW_PREVIEW_BYTES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPlan {
    Single {
        command: String,
        reasoning: Option<String>,
    },
    Multi {
        command: String,
        continues: bool,
        reasoning: Option<String>,
        next_step_hint: Option<String>,
    },
    Abort {
        reason: String,
    },
}

impl StepPlan {
    pub fn command(&self) -> Option<&str> {
        match self {
            StepPlan::Single { command, .. } | StepPlan::Multi { command, .. } => Some(command),
            StepPlan::Abort { .. } => None,
        }
    }

    pub fn continues(&self) -> bool {
        matches!(self, StepPlan::Multi { continues: true, .. })
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            StepPlan::Single { reasoning, .. } | StepPlan::Multi { reasoning, .. } => {
                reasoning.as_deref()
            }
            StepPlan::Abort { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    command: Option<String>,
    #[serde(default, rename = "continue")]
    continues: Option<bool>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    next_step_hint: Option<String>,
}

fn extract_json_block(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }
    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    (close > open).then(|| &trimmed[open..=close])
}

fn shape_error(message: impl Into<String>, raw: &str) -> AppError {
    AppError::generation(message).with_details(serde_json::json!({
        "response_preview": truncate_utf8_prefix(raw.trim(), RAW_PREVIEW_BYTES),
    }))
}

pub fn parse_plan(raw: &str, mode: PlanMode) -> Result<StepPlan, AppError> {
    let Some(block) = extract_json_block(raw) else {
        return Err(shape_error("Generation response contained no JSON object", raw));
    };
    let value: Value = serde_json::from_str(block)
        .map_err(|err| shape_error(format!("Generation response is not valid JSON: {}", err), raw))?;
    if !value.is_object() {
        return Err(shape_error("Generation response must be a JSON object", raw));
    }
    let parsed: RawPlan = serde_json::from_value(value)
        .map_err(|err| shape_error(format!("Generation response has the wrong shape: {}", err), raw))?;

    let command = parsed.command.unwrap_or_default().trim().to_string();
    if command.is_empty() {
        let reason = parsed
            .reasoning
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "no command was generated".to_string());
        return Ok(StepPlan::Abort { reason });
    }
    Ok(match mode {
        PlanMode::Single => StepPlan::Single {
            command,
            reasoning: parsed.reasoning,
        },
        PlanMode::Multi => StepPlan::Multi {
            command,
            continues: parsed.continues.unwrap_or(false),
            reasoning: parsed.reasoning,
            next_step_hint: parsed.next_step_hint,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_plan, PlanMode, StepPlan};
    use crate::errors::ErrorKind;

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "Here you go:\n```json\n{\"command\": \"df -h\", \"continue\": true, \"next_step_hint\": \"check inodes\"}\n```";
        let plan = parse_plan(raw, PlanMode::Multi).unwrap();
        assert_eq!(
            plan,
            StepPlan::Multi {
                command: "df -h".to_string(),
                continues: true,
                reasoning: None,
                next_step_hint: Some("check inodes".to_string()),
            }
        );
    }

    #[test]
    fn single_mode_ignores_continue() {
        let plan = parse_plan("{\"command\": \"uptime\", \"continue\": true}", PlanMode::Single).unwrap();
        assert_eq!(plan.command(), Some("uptime"));
        assert!(!plan.continues());
    }

    #[test]
    fn empty_command_aborts_with_reasoning() {
        let plan = parse_plan(
            "{\"command\": \"\", \"continue\": false, \"reasoning\": \"disk is fine\"}",
            PlanMode::Multi,
        )
        .unwrap();
        assert_eq!(
            plan,
            StepPlan::Abort {
                reason: "disk is fine".to_string()
            }
        );
    }

    #[test]
    fn prose_and_wrong_shapes_are_generation_errors() {
        let err = parse_plan("rm -rf / is what you want", PlanMode::Single).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generation);
        let err = parse_plan("{\"command\": 42}", PlanMode::Single).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generation);
        let err = parse_plan("{\"command\": \"ls\"", PlanMode::Single).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generation);
    }
}
