use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Key,
    Password,
    Agent,
}

impl AuthMode {
    pub fn requires_secret(self) -> bool {
        matches!(self, AuthMode::Password)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthMode::Key => "key",
            AuthMode::Password => "password",
            AuthMode::Agent => "agent",
        };
        write!(f, "{}", label)
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "key" => Ok(AuthMode::Key),
            "password" => Ok(AuthMode::Password),
            "agent" => Ok(AuthMode::Agent),
            other => Err(format!(
                "unsupported auth mode '{}' (expected key, password or agent)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub name: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub auth_mode: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
}

impl RemoteTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.destination(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub index: usize,
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    steps: Vec<ExecutionStep>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        command: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> &ExecutionStep {
        let index = self.steps.len() + 1;
        self.steps.push(ExecutionStep {
            index,
            command: command.into(),
            exit_code,
            output: output.into(),
        });
        &self.steps[index - 1]
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn last(&self) -> Option<&ExecutionStep> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub user_prompt: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_generated_command: Option<String>,
    #[serde(default)]
    pub user_modified: bool,
    pub executed: bool,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HistoryRecord {
    pub fn executed(
        user_prompt: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            command: command.into(),
            ai_generated_command: None,
            user_modified: false,
            executed: true,
            exit_code: Some(exit_code),
            output: output.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            reason: None,
        }
    }

    pub fn skipped(
        user_prompt: impl Into<String>,
        command: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            command: command.into(),
            ai_generated_command: None,
            user_modified: false,
            executed: false,
            exit_code: None,
            output: String::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_generated(mut self, generated: impl Into<String>) -> Self {
        let generated = generated.into();
        self.user_modified = generated != self.command;
        self.ai_generated_command = Some(generated);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellHistoryItem {
    pub cmd: String,
    pub exit: i32,
    pub time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub kernel: String,
    pub arch: String,
    pub hostname: String,
    pub user: String,
    pub shell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    pub collected_at: String,
}

impl SystemInfo {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("OS: {}", self.os),
            format!("Kernel: {}", self.kernel),
            format!("Architecture: {}", self.arch),
            format!("Hostname: {}", self.hostname),
            format!("User: {}", self.user),
            format!("Shell: {}", self.shell),
        ];
        if let Some(manager) = self.package_manager.as_ref() {
            lines.push(format!("Package manager: {}", manager));
        }
        lines.join("\n")
    }
}
