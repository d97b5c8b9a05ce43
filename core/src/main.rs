/// Friday - terminal client for the Friday chat workspace
use colored::*;
use friday_core::{cli_app, Config, FridayError};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let (config, rest) = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let result = cli_app::run(config, rest).await;
    if let Err(e) = &result {
        if e.downcast_ref::<FridayError>().is_some_and(|e| e.is_auth_error()) {
            eprintln!("{}", "Session expired or invalid, log in again.".yellow());
        }
    }
    result
}
