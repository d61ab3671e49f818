use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::models::Config;
use crate::server::{AppState, serve};

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "DOCUCHAT_HOST", help = "Address to bind")]
    pub host: Option<String>,

    #[arg(long, short = 'p', env = "DOCUCHAT_PORT", help = "Port to listen on")]
    pub port: Option<u16>,
}

pub async fn handle_serve(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!(
        driver = %config.vector_store.driver,
        embedding_model = %config.embedding.model,
        llm_model = %config.llm.model,
        "starting docuchat"
    );

    let state = AppState::from_config(config).await?;
    serve(state).await
}
