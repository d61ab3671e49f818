//! File name and checksum helpers.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Calculate SHA-256 checksum of content.
pub fn calculate_checksum(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    hex::encode(hash)
}

/// Sanitize an uploaded file name.
///
/// Only the final path component is kept, characters that are invalid on
/// common filesystems become hyphens, and leading dots are stripped so the
/// result can never name a parent or hidden entry.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    base.chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .trim_matches('-')
        .to_string()
}

/// Lower-cased extension of a file name, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// True when `segment` is usable as a single directory or file name.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// True when `name` is a knowledge base id (a hyphenated UUID).
///
/// Directories and collections that fail this check were not created by
/// DocuChat and are never touched by cleanup.
pub fn is_kb_id(name: &str) -> bool {
    name.len() == 36 && uuid::Uuid::parse_str(name).is_ok()
}
