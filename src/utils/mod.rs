//! Utility modules.

pub mod file;
pub mod retry;

pub use file::{calculate_checksum, file_extension, is_kb_id, is_safe_segment, sanitize_filename};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
