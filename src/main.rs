use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use tempbox::{start_sweeper, Config, RetentionSweeper, Stores};

/// Configuration file read at startup.
const CONFIG_PATH: &str = "config.toml";

fn print_usage() {
    eprintln!("Usage: tempbox [run|sweep]");
    eprintln!("  run    run the periodic retention sweeper until Ctrl-C (default)");
    eprintln!("  sweep  run one retention sweep and print the report as JSON");
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = std::env::args().nth(1);
    if !matches!(command.as_deref(), None | Some("run") | Some("sweep")) {
        print_usage();
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load_with_env(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    if let Err(e) = tempbox::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        tempbox::logging::init_console_only(&config.logging.level);
    }

    info!("tempbox - disposable email core");

    let stores = match Stores::open(&config).await {
        Ok(stores) => Arc::new(stores),
        Err(e) => {
            error!("Failed to open stores: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match command.as_deref() {
        Some("sweep") => {
            let report = RetentionSweeper::from_config(stores.clone(), &config.retention)
                .run_once()
                .await;
            match serde_json::to_string_pretty(&report) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Failed to serialize sweep report: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        _ => {
            let sweeper = start_sweeper(stores.clone(), &config.retention);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            sweeper.abort();
            let _ = sweeper.await;
            ExitCode::SUCCESS
        }
    };

    match Arc::try_unwrap(stores) {
        Ok(stores) => stores.close().await,
        Err(_) => warn!("Stores still in use at shutdown, skipping close"),
    }

    code
}
