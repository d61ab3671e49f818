//! Command line for the DocuChat backend.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Document upload and retrieval-augmented chat server.
#[derive(Debug, Parser)]
#[command(name = "docuchat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "DOCUCHAT_CONFIG",
        help = "Path to the configuration file"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve(commands::ServeArgs),

    /// Probe the embedding service, language model and vector store
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
