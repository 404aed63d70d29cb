use serde::Serialize;
use tiktoken_rs::CoreBPE;

pub const CHUNK_SIZE: usize = 512;
pub const CHUNK_OVERLAP: usize = 50;

/// A token-bounded segment of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
    pub token_count: usize,
}

/// Sliding-window chunker over cl100k_base tokens.
///
/// The window advances by `chunk_size - chunk_overlap` tokens, so successive
/// chunks share `chunk_overlap` tokens of context.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    bpe: CoreBPE,
}

impl TextChunker {
    pub fn new() -> Self {
        Self::with_params(CHUNK_SIZE, CHUNK_OVERLAP)
    }

    pub fn with_params(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            bpe: tiktoken_rs::cl100k_base().expect("cl100k_base vocabulary is embedded"),
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Split text into overlapping chunks by token count.
    ///
    /// Whitespace is normalized first; empty input yields an empty list and
    /// text within one window is returned as a single chunk.
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Vec::new();
        }

        let tokens = self.bpe.encode_ordinary(&normalized);
        let total = tokens.len();

        if total <= self.chunk_size {
            return vec![TextChunk {
                text: normalized,
                index: 0,
                token_count: total,
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        while start < total {
            let end = (start + self.chunk_size).min(total);
            let window = tokens[start..end].to_vec();
            let token_count = window.len();
            let chunk_text = self.bpe.decode(window).unwrap_or_default();
            let chunk_text = chunk_text.trim().to_string();
            if !chunk_text.is_empty() {
                chunks.push(TextChunk {
                    text: chunk_text,
                    index,
                    token_count,
                });
                index += 1;
            }

            // Guard against non-progress when overlap >= chunk_size.
            if end == total || end <= start + self.chunk_overlap {
                break;
            }
            start = end - self.chunk_overlap;
        }

        chunks
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = TextChunker::new();
        assert!(chunker.chunk_text("").is_empty());
        assert!(chunker.chunk_text("   \n\t  ").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = TextChunker::new();
        let chunks = chunker.chunk_text("A short paragraph about nothing much.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert!(chunks[0].token_count <= CHUNK_SIZE);
    }

    #[test]
    fn whitespace_is_normalized() {
        let chunker = TextChunker::new();
        let chunks = chunker.chunk_text("hello   world\n\nagain");
        assert_eq!(chunks[0].text, "hello world again");
    }

    #[test]
    fn long_text_produces_ordered_bounded_chunks() {
        let chunker = TextChunker::with_params(16, 4);
        let words: Vec<String> = (0..200).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        let chunks = chunker.chunk_text(&text);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.token_count <= 16);
        }
        // Sliding-window accounting: every boundary re-covers exactly the
        // overlap, so summed window sizes exceed the total by one overlap
        // per boundary.
        let total = chunker.count_tokens(&text);
        let summed: usize = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(summed, total + (chunks.len() - 1) * 4);
    }

    #[test]
    fn overlap_of_window_size_terminates() {
        let chunker = TextChunker::with_params(8, 8);
        let words: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
        // Would loop forever without the non-progress guard.
        let chunks = chunker.chunk_text(&words.join(" "));
        assert!(!chunks.is_empty());
    }

    #[test]
    fn overlap_larger_than_window_terminates() {
        let chunker = TextChunker::with_params(8, 20);
        let words: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
        let chunks = chunker.chunk_text(&words.join(" "));
        assert!(!chunks.is_empty());
    }
}
