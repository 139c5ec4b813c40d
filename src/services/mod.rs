pub mod confirm;
pub mod generation;
pub mod history;
pub mod hook;
pub mod logger;
pub mod plan;
pub mod registry;
pub mod secret;
pub mod settings;
pub mod shell_history;
pub mod sysinfo;
pub mod validation;
