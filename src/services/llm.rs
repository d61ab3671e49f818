//! Streaming chat-completion client for OpenAI-compatible providers.

use std::fmt::Display;
use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::embedding::provider_message;
use crate::error::LlmError;
use crate::models::{LlmConfig, Role};
use crate::utils::{RetryConfig, with_retry};

/// Message sent to the language model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
}

/// Fragments of a streamed completion, in upstream order.
///
/// The channel closes after the last fragment; a failure arrives as a final
/// `Err` item.
pub type TokenStream = mpsc::Receiver<Result<String, LlmError>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion.
    ///
    /// The producer stops reading upstream once `cancel` fires or the
    /// returned receiver is dropped.
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError>;

    async fn health_check(&self) -> Result<(), LlmError>;

    fn model(&self) -> &str;
}

pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryConfig,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            retry: RetryConfig::new(config.max_retries),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn open_stream(&self, body: &Value) -> Result<Response, LlmError> {
        let response = self
            .authorize(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": true,
        });

        let response = with_retry(&self.retry, "chat completion", || self.open_stream(&body))
            .await
            .into_result()?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump(Box::pin(response.bytes_stream()), tx, cancel));
        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .authorize(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await.map(|_| ())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_connect() {
        LlmError::ConnectionError(e.to_string())
    } else {
        LlmError::StreamError(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = provider_message(&body);
    Err(match status.as_u16() {
        401 | 403 => LlmError::Unauthorized(message),
        429 if body.contains("insufficient_quota") => LlmError::QuotaExceeded(message),
        429 => LlmError::RateLimited(message),
        code => LlmError::ServerError {
            status: code,
            message,
        },
    })
}

/// Splits a byte stream into lines, holding partial lines (and partial UTF-8
/// sequences) until their newline arrives.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string(),
            );
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end().to_string())
    }
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Delta(String),
    Done,
    Failed(String),
    Skip,
}

fn parse_line(line: &str) -> StreamEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return StreamEvent::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return StreamEvent::Skip;
    }
    if data == "[DONE]" {
        return StreamEvent::Done;
    }

    match serde_json::from_str::<Value>(data) {
        Ok(payload) => {
            if let Some(error) = payload.get("error") {
                let message = error["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return StreamEvent::Failed(message);
            }
            match payload["choices"][0]["delta"]["content"].as_str() {
                Some(content) if !content.is_empty() => StreamEvent::Delta(content.to_string()),
                _ => StreamEvent::Skip,
            }
        }
        Err(e) => StreamEvent::Failed(format!("malformed stream payload: {e}")),
    }
}

async fn forward(
    lines: Vec<String>,
    tx: &mpsc::Sender<Result<String, LlmError>>,
) -> ControlFlow<()> {
    for line in lines {
        match parse_line(&line) {
            StreamEvent::Delta(fragment) => {
                if tx.send(Ok(fragment)).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            StreamEvent::Done => return ControlFlow::Break(()),
            StreamEvent::Failed(message) => {
                let _ = tx.send(Err(LlmError::Upstream(message))).await;
                return ControlFlow::Break(());
            }
            StreamEvent::Skip => {}
        }
    }
    ControlFlow::Continue(())
}

/// Read an SSE completion body and forward its fragments until `[DONE]`,
/// an upstream error, cancellation, or the receiver going away.
async fn pump<S, B, E>(
    mut body: S,
    tx: mpsc::Sender<Result<String, LlmError>>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut lines = LineBuffer::default();

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("completion stream cancelled");
                return;
            }
            _ = tx.closed() => {
                debug!("completion receiver dropped");
                return;
            }
            item = body.next() => item,
        };

        match item {
            Some(Ok(bytes)) => {
                if forward(lines.push(bytes.as_ref()), &tx).await.is_break() {
                    return;
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(Err(LlmError::StreamError(e.to_string()))).await;
                return;
            }
            None => {
                let tail = lines.finish().into_iter().collect();
                if forward(tail, &tx).await.is_break() {
                    return;
                }
                let _ = tx.send(Err(LlmError::StreamInterrupted)).await;
                return;
            }
        }
    }
}
