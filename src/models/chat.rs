use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn as presented to a client. Never persisted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn assistant(content: String, sources: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            sources,
            timestamp: Utc::now(),
        }
    }
}

/// Body of `POST /chat/{kb_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Non-streaming chat answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub response: String,
    pub sources: Vec<String>,
}

/// A frame of the chat event stream.
///
/// `Start` always comes first; exactly one of `Done` or `Error` ends a stream
/// that still has a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatFrame {
    Start,
    Content { content: String },
    Error { content: String },
    Done { sources: Vec<String> },
}

impl ChatFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatFrame::Done { .. } | ChatFrame::Error { .. })
    }
}

/// Where a chat request is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPhase {
    Received,
    Embedding,
    Retrieving,
    Prompting,
    Streaming,
    Done,
    Cancelled,
    Failed(String),
}

impl ChatPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatPhase::Done | ChatPhase::Cancelled | ChatPhase::Failed(_)
        )
    }
}

impl fmt::Display for ChatPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatPhase::Received => write!(f, "received"),
            ChatPhase::Embedding => write!(f, "embedding"),
            ChatPhase::Retrieving => write!(f, "retrieving"),
            ChatPhase::Prompting => write!(f, "prompting"),
            ChatPhase::Streaming => write!(f, "streaming"),
            ChatPhase::Done => write!(f, "done"),
            ChatPhase::Cancelled => write!(f, "cancelled"),
            ChatPhase::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
