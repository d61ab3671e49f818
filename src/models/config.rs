use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["pdf", "docx", "txt", "pptx", "csv"];

const CONFIG_ENV: &str = "DOCUCHAT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Default location of the config file.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|p| p.join("docuchat").join("config.toml"))
    }

    /// Resolve the file to read: an explicit path wins over the default.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit.map(Path::to_path_buf).or_else(Self::config_path)
    }

    /// Load the config file (defaults when absent), apply environment
    /// overrides, then validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)?
            }
            Some(path) if explicit.is_some() => {
                return Err(ConfigError::PathError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            _ => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.embedding.api_key.get_or_insert_with(|| key.clone());
            self.llm.api_key.get_or_insert(key);
        }
        if let Some(host) = var("DOCUCHAT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("DOCUCHAT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = var("DOCUCHAT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("DOCUCHAT_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(level) = var("DOCUCHAT_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.ingestion.chunk_size == 0 {
            return invalid("ingestion.chunk_size must be greater than zero".into());
        }
        if self.ingestion.chunk_overlap >= self.ingestion.chunk_size {
            return invalid(format!(
                "ingestion.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.ingestion.chunk_overlap, self.ingestion.chunk_size
            ));
        }
        if self.ingestion.concurrency == 0 {
            return invalid("ingestion.concurrency must be at least 1".into());
        }
        if self.ingestion.max_file_size == 0 {
            return invalid("ingestion.max_file_size must be greater than zero".into());
        }
        if let Some(ext) = self
            .ingestion
            .allowed_extensions
            .iter()
            .find(|ext| !SUPPORTED_EXTENSIONS.contains(&normalize_extension(ext).as_str()))
        {
            return invalid(format!("ingestion.allowed_extensions: '{ext}' is not supported"));
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be greater than zero".into());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1".into());
        }
        if self.chat.top_k == 0 {
            return invalid("chat.top_k must be at least 1".into());
        }
        if !(0.0..=2.0).contains(&self.chat.default_temperature) {
            return invalid("chat.default_temperature must be within 0.0..=2.0".into());
        }
        Ok(())
    }

    /// Path of the knowledge base metadata document.
    pub fn metadata_path(&self) -> PathBuf {
        self.storage.data_dir.join("kb_metadata.json")
    }

    /// Path of the embedded vector database.
    pub fn vector_db_path(&self) -> PathBuf {
        self.vector_store
            .path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("vectors.db"))
    }

    /// Largest request body accepted by the upload endpoints.
    pub fn max_request_bytes(&self) -> usize {
        let files = self.ingestion.max_file_size.saturating_mul(self.server.max_files_per_upload);
        usize::try_from(files.saturating_add(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_files_per_upload")]
    pub max_files_per_upload: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

fn default_max_files_per_upload() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_files_per_upload: default_max_files_per_upload(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            upload_dir: default_upload_dir(),
        }
    }
}

/// Wire dialect spoken by the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings`.
    #[default]
    OpenAi,
    /// Hugging Face text-embeddings-inference `/embed`.
    Tei,
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingProvider::OpenAi => write!(f, "openai"),
            EmbeddingProvider::Tei => write!(f, "tei"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_openai_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_openai_url() -> String {
    DEFAULT_OPENAI_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_batch_size() -> usize {
    64
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            url: default_openai_url(),
            api_key: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_openai_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_openai_url(),
            api_key: None,
            model: default_chat_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Sqlite,
    Qdrant,
}

impl fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorDriver::Sqlite => write!(f, "sqlite"),
            VectorDriver::Qdrant => write!(f, "qdrant"),
        }
    }
}

impl FromStr for VectorDriver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(VectorDriver::Sqlite),
            "qdrant" => Ok(VectorDriver::Qdrant),
            other => Err(ConfigError::ValidationError(format!(
                "unknown vector store driver: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    /// SQLite database file; defaults to `<data_dir>/vectors.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            path: None,
            url: default_qdrant_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Pull chunk ends back to paragraph, line, or sentence boundaries.
    #[serde(default)]
    pub boundary_aware: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_concurrency() -> usize {
    4
}

fn default_max_file_size() -> u64 {
    20 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

impl IngestionConfig {
    pub fn allows(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| normalize_extension(allowed) == extension)
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            boundary_aware: false,
            concurrency: default_concurrency(),
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

fn default_top_k() -> usize {
    4
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_message_chars() -> usize {
    4000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            default_temperature: default_temperature(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; stdout only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}
