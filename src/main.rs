use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;

use docuchat::cli::commands::{handle_config, handle_serve, handle_status};
use docuchat::cli::{Cli, Commands};
use docuchat::logging;
use docuchat::models::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tokio::select! {
        result = run_command(cli) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal, stopping");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

async fn run_command(cli: Cli) -> Result<()> {
    let explicit = cli.config.as_deref();

    match cli.command {
        Commands::Config(cmd) => {
            handle_config(cmd, explicit).await?;
        }
        Commands::Status => {
            let config = Config::load(explicit).context("failed to load configuration")?;
            handle_status(&config).await?;
        }
        Commands::Serve(args) => {
            let config = Config::load(explicit).context("failed to load configuration")?;
            logging::init(&config.logging);
            handle_serve(args, config).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
