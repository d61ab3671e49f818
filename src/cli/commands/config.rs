use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::models::Config;

const MASK: &str = "********";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Show the resolved configuration")]
    Show {
        #[arg(long, help = "Print as JSON instead of TOML")]
        json: bool,
    },
    #[command(about = "Show the configuration file path")]
    Path,
    #[command(about = "Write a configuration file with default values")]
    Init {
        #[arg(long, short = 'f', help = "Force overwrite existing config")]
        force: bool,
    },
}

pub async fn handle_config(cmd: ConfigCommand, explicit: Option<&Path>) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => handle_show(explicit, json),
        ConfigCommand::Path => handle_path(explicit),
        ConfigCommand::Init { force } => handle_init(explicit, force),
    }
}

fn handle_show(explicit: Option<&Path>, json: bool) -> Result<()> {
    let config = masked(Config::load(explicit)?);

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match Config::resolve_path(explicit) {
        Some(path) if path.exists() => println!("# Config file: {}", path.display()),
        _ => println!("# No config file; using defaults"),
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn handle_path(explicit: Option<&Path>) -> Result<()> {
    let path = Config::resolve_path(explicit)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
    let state = if path.exists() { "exists" } else { "not created" };
    println!("{} ({state})", path.display());
    Ok(())
}

fn handle_init(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = Config::resolve_path(explicit)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .save(&path)
        .context("failed to write config")?;
    println!("Created config at: {}", path.display());
    Ok(())
}

/// Hide secrets before printing.
fn masked(mut config: Config) -> Config {
    for key in [
        &mut config.embedding.api_key,
        &mut config.llm.api_key,
        &mut config.vector_store.api_key,
    ] {
        if key.is_some() {
            *key = Some(MASK.to_string());
        }
    }
    config
}
