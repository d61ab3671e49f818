use anyhow::Result;

use crate::models::{Config, VectorDriver};
use crate::services::{ChatModel, Embedder, EmbeddingClient, OpenAiChatClient, create_backend};

fn report(component: &str, target: &str, result: &Result<(), String>) {
    match result {
        Ok(()) => println!("  {component:<18} ok       {target}"),
        Err(e) => println!("  {component:<18} FAILED   {target}: {e}"),
    }
}

pub async fn handle_status(config: &Config) -> Result<()> {
    println!("DocuChat status");

    let embedding = match EmbeddingClient::new(&config.embedding) {
        Ok(client) => client.health_check().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    report(
        "embedding service",
        &format!("{} ({})", config.embedding.url, config.embedding.model),
        &embedding,
    );

    let llm = match OpenAiChatClient::new(&config.llm) {
        Ok(client) => client.health_check().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    report(
        "language model",
        &format!("{} ({})", config.llm.url, config.llm.model),
        &llm,
    );

    let store_target = match config.vector_store.driver {
        VectorDriver::Sqlite => format!("sqlite {}", config.vector_db_path().display()),
        VectorDriver::Qdrant => format!("qdrant {}", config.vector_store.url),
    };
    let (store, collections) = match create_backend(config).await {
        Ok(store) => match store.health_check().await {
            Ok(true) => (Ok(()), store.list_collections().await.map(|c| c.len()).ok()),
            Ok(false) => (Err("not responding".to_string()), None),
            Err(e) => (Err(e.to_string()), None),
        },
        Err(e) => (Err(e.to_string()), None),
    };
    report("vector store", &store_target, &store);

    if let Some(count) = collections {
        println!("  {:<18} {count}", "collections");
    }

    if embedding.is_err() || llm.is_err() {
        eprintln!();
        eprintln!("Hint: set OPENAI_API_KEY or the api_key fields in the config file.");
    }
    if store.is_err() && config.vector_store.driver == VectorDriver::Qdrant {
        eprintln!("Warning: Qdrant not reachable. Start it with: docker run -p 6334:6334 qdrant/qdrant");
    }

    Ok(())
}
