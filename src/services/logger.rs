use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return LogLevel::Error;
        }
        match verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

// SHELLCRAFT_LOG wins over LOG_LEVEL, which wins over the CLI verbosity.
pub fn init_tracing(default_level: LogLevel) {
    let filter = std::env::var("SHELLCRAFT_LOG")
        .ok()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level.as_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug, Clone)]
pub struct Logger {
    context: String,
}

impl Logger {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
        }
    }

    pub fn child(&self, suffix: &str) -> Self {
        let context = if suffix.is_empty() {
            self.context.clone()
        } else {
            format!("{}:{}", self.context, suffix)
        };
        Self { context }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    fn render_meta(meta: Option<&Value>) -> String {
        meta.filter(|m| !m.is_null())
            .map(|m| m.to_string())
            .unwrap_or_default()
    }

    pub fn error(&self, message: &str, meta: Option<&Value>) {
        tracing::error!(context = %self.context, meta = %Self::render_meta(meta), "{}", message);
    }

    pub fn warn(&self, message: &str, meta: Option<&Value>) {
        tracing::warn!(context = %self.context, meta = %Self::render_meta(meta), "{}", message);
    }

    pub fn info(&self, message: &str, meta: Option<&Value>) {
        tracing::info!(context = %self.context, meta = %Self::render_meta(meta), "{}", message);
    }

    pub fn debug(&self, message: &str, meta: Option<&Value>) {
        tracing::debug!(context = %self.context, meta = %Self::render_meta(meta), "{}", message);
    }
}
