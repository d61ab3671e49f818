//! Character-window text splitting with overlap.

use crate::error::SplitError;
use crate::models::{IngestionConfig, TextChunk};

/// Splits extracted text into overlapping chunks.
///
/// Sizes are counted in chars. Chunk `i + 1` always starts exactly `overlap`
/// chars before chunk `i` ends, so the chunks cover the input with no gaps.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
    boundary_aware: bool,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, SplitError> {
        if chunk_size == 0 {
            return Err(SplitError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(SplitError::InvalidConfig(format!(
                "overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            boundary_aware: false,
        })
    }

    pub fn from_config(config: &IngestionConfig) -> Result<Self, SplitError> {
        Ok(Self::new(config.chunk_size, config.chunk_overlap)?
            .with_boundary_aware(config.boundary_aware))
    }

    /// Prefer ending chunks on paragraph, line, sentence, or word boundaries.
    #[must_use]
    pub fn with_boundary_aware(mut self, enabled: bool) -> Self {
        self.boundary_aware = enabled;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Number of chunks fixed-window splitting yields for `total_chars`.
    pub fn expected_chunks(&self, total_chars: usize) -> usize {
        if total_chars == 0 {
            return 0;
        }
        if total_chars <= self.chunk_size {
            return 1;
        }
        let step = self.chunk_size - self.overlap;
        (total_chars - self.overlap).div_ceil(step)
    }

    pub fn split(&self, text: &str) -> Result<Vec<TextChunk>, SplitError> {
        if text.trim().is_empty() {
            return Err(SplitError::EmptyInput);
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::with_capacity(self.expected_chunks(total));
        let mut start = 0;

        loop {
            let mut end = (start + self.chunk_size).min(total);
            if self.boundary_aware && end < total {
                end = self.find_break_point(&chars, start, end);
            }

            chunks.push(TextChunk {
                index: chunks.len(),
                content: chars[start..end].iter().collect(),
                start_offset: start,
                end_offset: end,
            });

            if end >= total {
                break;
            }
            start = end - self.overlap;
        }

        Ok(chunks)
    }

    /// Find a natural break point in the last 20% of the window.
    ///
    /// Only positions past `start + overlap` qualify so every chunk still
    /// advances the next start.
    fn find_break_point(&self, chars: &[char], start: usize, target_end: usize) -> usize {
        let floor = start + self.overlap + 1;
        let search_start = target_end.saturating_sub(self.chunk_size / 5).max(floor);
        if search_start >= target_end {
            return target_end;
        }

        // Priority: double newline > single newline > sentence end > space
        let mut paragraph = None;
        let mut newline = None;
        let mut sentence = None;
        let mut space = None;

        for pos in search_start..target_end {
            match chars[pos] {
                '\n' => {
                    if pos > 0 && chars[pos - 1] == '\n' {
                        paragraph = Some(pos + 1);
                    }
                    newline = Some(pos + 1);
                }
                '.' | '!' | '?' => {
                    if chars.get(pos + 1).is_some_and(|c| c.is_whitespace()) {
                        sentence = Some(pos + 1);
                    }
                }
                ' ' | '\t' => space = Some(pos + 1),
                _ => {}
            }
        }

        paragraph
            .or(newline)
            .or(sentence)
            .or(space)
            .unwrap_or(target_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the source by dropping each later chunk's overlap prefix.
    fn reconstruct(chunks: &[TextChunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&chunk.content);
            } else {
                out.extend(chunk.content.chars().skip(overlap));
            }
        }
        out
    }

    fn assert_contiguous(chunks: &[TextChunk], overlap: usize) {
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_offset, pair[0].end_offset - overlap);
        }
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let splitter = TextSplitter::new(100, 20).unwrap();
        let chunks = splitter.split("Hello, world!").unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].end_offset, 13);
    }

    #[test]
    fn test_text_of_exactly_chunk_size_is_single_chunk() {
        let splitter = TextSplitter::new(10, 3).unwrap();
        let chunks = splitter.split(&"x".repeat(10)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_and_whitespace_input_rejected() {
        let splitter = TextSplitter::new(100, 20).unwrap();
        assert_eq!(splitter.split(""), Err(SplitError::EmptyInput));
        assert_eq!(splitter.split("  \n\t "), Err(SplitError::EmptyInput));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            TextSplitter::new(0, 0),
            Err(SplitError::InvalidConfig(_))
        ));
        assert!(matches!(
            TextSplitter::new(10, 10),
            Err(SplitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_coverage_and_minimal_count() {
        let text: String = (0..2_345)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();

        for (size, overlap) in [(1000, 200), (100, 0), (64, 63), (7, 3)] {
            let splitter = TextSplitter::new(size, overlap).unwrap();
            let chunks = splitter.split(&text).unwrap();

            assert_eq!(reconstruct(&chunks, overlap), text);
            assert_contiguous(&chunks, overlap);
            assert_eq!(chunks.len(), splitter.expected_chunks(text.len()));
            assert_eq!(chunks.last().unwrap().end_offset, text.len());
            assert!(chunks.iter().all(|c| c.char_len() <= size));
        }
    }

    #[test]
    fn test_expected_chunks_formula() {
        let splitter = TextSplitter::new(1000, 200).unwrap();
        assert_eq!(splitter.expected_chunks(1000), 1);
        assert_eq!(splitter.expected_chunks(1001), 2);
        assert_eq!(splitter.expected_chunks(1800), 2);
        assert_eq!(splitter.expected_chunks(1801), 3);
    }

    #[test]
    fn test_multibyte_text_is_split_on_chars() {
        let text = "가나다라마바사아자차카타파하".repeat(10);
        let splitter = TextSplitter::new(30, 5).unwrap();
        let chunks = splitter.split(&text).unwrap();

        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks, 5), text);
        assert!(chunks.iter().all(|c| c.content.chars().count() == c.char_len()));
    }

    #[test]
    fn test_deterministic() {
        let splitter = TextSplitter::new(50, 10).unwrap();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        assert_eq!(splitter.split(&text).unwrap(), splitter.split(&text).unwrap());
    }

    #[test]
    fn test_boundary_aware_prefers_paragraph_breaks() {
        let splitter = TextSplitter::new(50, 10)
            .unwrap()
            .with_boundary_aware(true);
        let text = format!("{}\n\n{}", "a".repeat(45), "b".repeat(80));
        let chunks = splitter.split(&text).unwrap();

        assert_eq!(chunks[0].content, format!("{}\n\n", "a".repeat(45)));
        assert_eq!(reconstruct(&chunks, 10), text);
        assert_contiguous(&chunks, 10);
    }

    #[test]
    fn test_boundary_aware_keeps_coverage_on_prose() {
        let text = "Retrieval pipelines split documents. Each chunk overlaps the next!\n"
            .repeat(40);
        let splitter = TextSplitter::new(120, 30)
            .unwrap()
            .with_boundary_aware(true);
        let chunks = splitter.split(&text).unwrap();

        assert_eq!(reconstruct(&chunks, 30), text);
        assert_contiguous(&chunks, 30);
        assert!(chunks.iter().all(|c| c.char_len() > 30 || c.end_offset == text.chars().count()));
    }
}
