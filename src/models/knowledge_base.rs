use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest display name accepted for a knowledge base, in characters.
pub const MAX_NAME_CHARS: usize = 100;

/// Metadata of one knowledge base.
///
/// Chunks live in the vector collection keyed by `id` and source files in the
/// upload directory keyed by the same id; this record only points at them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(rename = "kb_id")]
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_names: Vec<String>,
    pub file_count: usize,
}

impl KnowledgeBase {
    pub fn new(id: String, name: Option<String>) -> Self {
        let now = Utc::now();
        let name = name.unwrap_or_else(|| Self::default_name(&id));
        Self {
            id,
            name,
            created_at: now,
            updated_at: now,
            file_names: Vec::new(),
            file_count: 0,
        }
    }

    /// "Knowledge Base" followed by the first eight characters of the id.
    pub fn default_name(id: &str) -> String {
        let short: String = id.chars().take(8).collect();
        format!("Knowledge Base {short}")
    }

    /// Append file names not yet recorded, keeping submission order.
    pub fn add_files<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        for name in names {
            if !self.file_names.contains(&name) {
                self.file_names.push(name);
            }
        }
        self.file_count = self.file_names.len();
        self.touch();
    }

    pub fn rename(&mut self, name: String) {
        self.name = name;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Row returned by the knowledge base listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    pub kb_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_count: usize,
}

impl From<&KnowledgeBase> for KnowledgeBaseSummary {
    fn from(kb: &KnowledgeBase) -> Self {
        Self {
            kb_id: kb.id.clone(),
            name: kb.name.clone(),
            created_at: kb.created_at,
            updated_at: kb.updated_at,
            file_count: kb.file_count,
        }
    }
}

/// A knowledge base together with the size of its vector collection.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseDetail {
    #[serde(flatten)]
    pub knowledge_base: KnowledgeBase,
    pub chunk_count: u64,
}

/// What an orphan sweep removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed_collections: Vec<String>,
    pub removed_upload_dirs: Vec<String>,
    pub removed_metadata: Vec<String>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed_collections.is_empty()
            && self.removed_upload_dirs.is_empty()
            && self.removed_metadata.is_empty()
    }
}
