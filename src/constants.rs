pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_CONNECT_MS: u64 = 10_000;
    pub const CONTROL_PERSIST_SECS: u64 = 600;
    pub const MASTER_READY_POLL_MS: u64 = 50;
    pub const ESTABLISH_LOCK_STALE_MS: u64 = 60_000;
    pub const SSH_CONNECTION_EXIT_CODE: i32 = 255;
    pub const SSHPASS_BAD_PASSWORD_EXIT_CODE: i32 = 5;
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
    pub const MAX_NAME_LENGTH: usize = 64;
    pub const DEFAULT_MAX_STEPS: usize = 10;
    pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;
    pub const MAX_CONTEXT_OUTPUT_BYTES: usize = 4 * 1024;
    pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
}

pub mod timeouts {
    pub const COMMAND_DEFAULT_MS: u64 = 120_000;
    pub const PROBE_MS: u64 = 15_000;
    pub const TIMED_OUT_EXIT_CODE: i32 = 124;
}

pub mod history {
    pub const DEFAULT_RETENTION: usize = 50;
    pub const DEFAULT_SHELL_HISTORY_LIMIT: usize = 20;
    pub const DEFAULT_CONTEXT_RECORDS: usize = 10;
    pub const REMOTE_SHELL_HISTORY_PATH: &str = "~/.shellcraft/shell_history.jsonl";
}

pub mod cache {
    pub const SYSINFO_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;
}

pub mod generation {
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
    pub const TIMEOUT_REQUEST_MS: u64 = 60_000;
}
