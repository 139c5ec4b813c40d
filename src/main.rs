use clap::Parser;
use shellcraft::app::App;
use shellcraft::cli::{self, Cli};
use shellcraft::errors::AppError;
use shellcraft::services::logger::{init_tracing, LogLevel};
use shellcraft::services::secret::{SecretProvider, StaticSecretProvider, TtySecretProvider};
use shellcraft::services::settings::Settings;
use std::sync::Arc;

async fn run(cli: Cli) -> Result<i32, AppError> {
    let settings = Settings::load()?;
    let secrets: Arc<dyn SecretProvider> = match StaticSecretProvider::from_env() {
        Some(provider) => Arc::new(provider),
        None => Arc::new(TtySecretProvider::new()),
    };
    let app = App::initialize(settings, secrets)?;
    cli::run(&app, cli.command).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(LogLevel::from_verbosity(cli.verbose, cli.quiet));
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("shellcraft: {}", err);
            if let Some(hint) = err.hint.as_ref() {
                eprintln!("hint: {}", hint);
            }
            std::process::exit(1);
        }
    }
}
