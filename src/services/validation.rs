use crate::constants::limits::{MAX_NAME_LENGTH, MAX_PORT, MIN_PORT};
use crate::errors::AppError;

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(&self, value: &str, label: &str) -> Result<String, AppError> {
        let normalized = value.trim();
        if normalized.is_empty() {
            return Err(AppError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        if normalized.contains('\0') {
            return Err(AppError::invalid_params(format!(
                "{} must not contain null bytes",
                label
            )));
        }
        Ok(normalized.to_string())
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&str>,
        label: &str,
    ) -> Result<Option<String>, AppError> {
        match value {
            None => Ok(None),
            Some(val) if val.trim().is_empty() => Ok(None),
            Some(val) => self.ensure_string(val, label).map(Some),
        }
    }

    // Names become directory and socket-lock names, so keep them path-safe.
    pub fn ensure_remote_name(&self, value: &str) -> Result<String, AppError> {
        let name = self.ensure_string(value, "Remote name")?;
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_chars || name.starts_with('.') || name.len() > MAX_NAME_LENGTH {
            return Err(AppError::invalid_params(format!(
                "Remote name '{}' is invalid",
                name
            ))
            .with_hint(format!(
                "Use 1-{} characters from [A-Za-z0-9._-], not starting with a dot.",
                MAX_NAME_LENGTH
            )));
        }
        Ok(name)
    }

    pub fn ensure_host(&self, value: &str) -> Result<String, AppError> {
        let host = self.ensure_string(value, "Host")?;
        if host.chars().any(|c| c.is_whitespace()) || host.starts_with('-') {
            return Err(AppError::invalid_params(format!(
                "Host '{}' is invalid",
                host
            )));
        }
        Ok(host)
    }

    pub fn ensure_port(&self, value: Option<u32>, fallback: u16) -> Result<u16, AppError> {
        let Some(numeric) = value else {
            return Ok(fallback);
        };
        if numeric < MIN_PORT as u32 || numeric > MAX_PORT as u32 {
            return Err(AppError::invalid_params(format!(
                "Port must be an integer between {} and {}",
                MIN_PORT, MAX_PORT
            )));
        }
        Ok(numeric as u16)
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}
