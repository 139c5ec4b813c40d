use crate::errors::AppError;
use crate::models::ShellHistoryItem;
use crate::services::validation::Validation;

const BASH_HOOK: &str = r#"# shellcraft: record each finished command
__shellcraft_record() {
  local status=$?
  local cmd
  cmd=$(HISTTIMEFORMAT= history 1 | sed -e 's/^ *[0-9]\+ *//')
  if [ -n "$cmd" ] && [ "$cmd" != "$__shellcraft_last" ]; then
    __shellcraft_last=$cmd
    (shellcraft hook record --exit "$status" --cmd "$cmd" >/dev/null 2>&1 &)
  fi
  return $status
}
PROMPT_COMMAND="__shellcraft_record${PROMPT_COMMAND:+;$PROMPT_COMMAND}"
"#;

const ZSH_HOOK: &str = r#"# shellcraft: record each finished command
__shellcraft_preexec() { __shellcraft_cmd=$1 }
__shellcraft_precmd() {
  local status=$?
  if [[ -n $__shellcraft_cmd ]]; then
    shellcraft hook record --exit "$status" --cmd "$__shellcraft_cmd" >/dev/null 2>&1 &!
    __shellcraft_cmd=
  fi
}
autoload -Uz add-zsh-hook
add-zsh-hook preexec __shellcraft_preexec
add-zsh-hook precmd __shellcraft_precmd
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookShell {
    Bash,
    Zsh,
}

impl std::str::FromStr for HookShell {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "bash" => Ok(HookShell::Bash),
            "zsh" => Ok(HookShell::Zsh),
            other => Err(format!("unsupported shell '{}' (expected bash or zsh)", other)),
        }
    }
}

pub fn hook_script(shell: HookShell) -> &'static str {
    match shell {
        HookShell::Bash => BASH_HOOK,
        HookShell::Zsh => ZSH_HOOK,
    }
}

pub fn build_record(cmd: &str, exit: i32) -> Result<ShellHistoryItem, AppError> {
    let cmd = Validation::new().ensure_string(cmd, "Command")?;
    Ok(ShellHistoryItem {
        cmd,
        exit,
        time: chrono::Utc::now().to_rfc3339(),
    })
}
