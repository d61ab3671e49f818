//! Embedding client for generating text embeddings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, EmbeddingProvider};
use crate::utils::{RetryConfig, with_retry};

/// Converts text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    /// Check that the service is reachable and accepts our credentials.
    async fn health_check(&self) -> Result<(), EmbeddingError>;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;
}

/// Request body for OpenAI-compatible `/embeddings`.
#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

/// Request body for text-embeddings-inference `/embed`.
#[derive(Debug, Serialize)]
struct TeiEmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct TeiEmbedResponse(Vec<Vec<f32>>);

/// HTTP client for the external embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: Client,
    provider: EmbeddingProvider,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    batch_size: usize,
    retry: RetryConfig,
}

impl EmbeddingClient {
    /// Create a new embedding client with the given configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            provider: config.provider,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            retry: RetryConfig::new(config.max_retries),
        })
    }

    /// Get the base URL of the embedding service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = match self.provider {
            EmbeddingProvider::OpenAi => self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .json(&OpenAiEmbedRequest {
                    model: &self.model,
                    input: texts,
                }),
            EmbeddingProvider::Tei => self
                .client
                .post(format!("{}/embed", self.base_url))
                .json(&TeiEmbedRequest {
                    inputs: texts,
                    truncate: true,
                }),
        };

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status(response).await?;

        let vectors = match self.provider {
            EmbeddingProvider::OpenAi => {
                let body: OpenAiEmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                order_by_index(body.data)
            }
            EmbeddingProvider::Tei => {
                let body: TeiEmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                body.0
            }
        };

        validate_vectors(&vectors, texts.len(), self.dimension)?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), model = %self.model, "embedding batch");
            let embeddings = with_retry(&self.retry, "embed", || self.embed_single_batch(batch))
                .await
                .into_result()?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = match self.provider {
            EmbeddingProvider::OpenAi => format!("{}/models", self.base_url),
            EmbeddingProvider::Tei => format!("{}/health", self.base_url),
        };
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await.map(|_| ())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn map_send_error(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout
    } else if e.is_connect() {
        EmbeddingError::ConnectionError(e.to_string())
    } else {
        EmbeddingError::RequestError(e)
    }
}

async fn check_status(response: Response) -> Result<Response, EmbeddingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status.as_u16(), &body))
}

/// Map a non-success HTTP status to an error, separating fatal credential
/// and quota failures from transient rate limiting.
fn classify_failure(status: u16, body: &str) -> EmbeddingError {
    let message = provider_message(body);
    match status {
        401 | 403 => EmbeddingError::Unauthorized(message),
        429 if body.contains("insufficient_quota") => EmbeddingError::QuotaExceeded(message),
        429 => EmbeddingError::RateLimited(message),
        _ => EmbeddingError::ServerError { status, message },
    }
}

/// The `error.message` of an OpenAI-style error body, else the raw body.
pub(crate) fn provider_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn order_by_index(mut data: Vec<OpenAiEmbedding>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

fn validate_vectors(
    vectors: &[Vec<f32>],
    expected_len: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_len {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected_len} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected dimension {dimension}, got {}",
            bad.len()
        )));
    }
    Ok(())
}
