
use serde::{Deserialize, Serialize};
use tracing::{Level, debug};

use crate::config::ConfigError;

/// Which chunker the offline pipeline uses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Fixed,
    Semantic,
}

/// Configuration for content chunking. All sizes are in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    /// Window length for the fixed-size chunker
    pub chunk_size: usize,
    /// Characters shared by adjacent fixed-size windows
    pub chunk_overlap: usize,
    /// Upper bound for semantic chunks
    pub max_chunk_size: usize,
    /// Semantic chunks shorter than this are merged with their neighbours
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Semantic,
            chunk_size: 500,
            chunk_overlap: 50,
            max_chunk_size: 800,
            min_chunk_size: 100,
        }
    }
}

/// A text splitter selected from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunker {
    Fixed(FixedSizeChunker),
    Semantic(SemanticChunker),
}

impl Chunker {
    #[inline]
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        match config.strategy {
            ChunkingStrategy::Fixed => Ok(Self::Fixed(FixedSizeChunker::new(
                config.chunk_size,
                config.chunk_overlap,
            )?)),
            ChunkingStrategy::Semantic => Ok(Self::Semantic(SemanticChunker::new(
                config.max_chunk_size,
                config.min_chunk_size,
            )?)),
        }
    }

    /// Split `text` into ordered chunks. Whitespace-only input yields nothing.
    #[inline]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chunks = match self {
            Self::Fixed(chunker) => chunker.chunk(text),
            Self::Semantic(chunker) => chunker.chunk(text),
        };

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                "Chunked {} chars into {} chunks (avg {} tokens)",
                text.chars().count(),
                chunks.len(),
                chunks.iter().map(|c| estimate_token_count(c)).sum::<usize>()
                    / chunks.len().max(1)
            );
        }

        chunks
    }

    #[inline]
    pub fn strategy(&self) -> ChunkingStrategy {
        match self {
            Self::Fixed(_) => ChunkingStrategy::Fixed,
            Self::Semantic(_) => ChunkingStrategy::Semantic,
        }
    }
}

/// Consecutive windows of `size` characters, each sharing `overlap`
/// characters with the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    #[inline]
    pub fn new(size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidChunkSize(size));
        }
        if overlap >= size {
            return Err(ConfigError::InvalidOverlap { overlap, size });
        }
        Ok(Self { size, overlap })
    }

    #[inline]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let step = (self.size - self.overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
            start += step;
        }

        chunks
    }
}

/// Paragraph- and sentence-aware splitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticChunker {
    max_size: usize,
    min_size: usize,
}

impl SemanticChunker {
    #[inline]
    pub fn new(max_size: usize, min_size: usize) -> Result<Self, ConfigError> {
        if max_size == 0 {
            return Err(ConfigError::InvalidChunkSize(max_size));
        }
        if min_size > max_size {
            return Err(ConfigError::InvalidSemanticBounds {
                min: min_size,
                max: max_size,
            });
        }
        Ok(Self { max_size, min_size })
    }

    #[inline]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for paragraph in split_paragraphs(text) {
            let current_len = char_len(&current);
            let paragraph_len = char_len(&paragraph);

            if current_len + paragraph_len + 2 <= self.max_size {
                append_paragraph(&mut current, &paragraph);
                continue;
            }

            if !current.is_empty() && current_len >= self.min_size {
                chunks.push(std::mem::replace(&mut current, paragraph));
            } else {
                append_paragraph(&mut current, &paragraph);
            }

            if char_len(&current) > self.max_size {
                current = self.split_oversized(&current, &mut chunks);
            }
        }

        if current.is_empty() {
            return chunks;
        }

        match chunks.last_mut() {
            Some(last) if char_len(&current) < self.min_size => {
                last.push_str("\n\n");
                last.push_str(&current);
            }
            _ => chunks.push(current),
        }

        chunks
    }

    /// Re-accumulate an oversized buffer sentence by sentence, pushing full
    /// chunks and returning the remainder as the new buffer.
    fn split_oversized(&self, buffer: &str, chunks: &mut Vec<String>) -> String {
        let mut pending = String::new();
        let mut pending_len = 0;

        for sentence in split_sentences(buffer) {
            let sentence_len = char_len(sentence);
            if pending_len + sentence_len <= self.max_size {
                pending.push_str(sentence);
                pending_len += sentence_len;
                continue;
            }

            let flushed = pending.trim();
            if !flushed.is_empty() {
                chunks.push(flushed.to_string());
            }
            pending = sentence.to_string();
            pending_len = sentence_len;
        }

        pending.trim().to_string()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn append_paragraph(buffer: &mut String, paragraph: &str) {
    if !buffer.is_empty() {
        buffer.push_str("\n\n");
    }
    buffer.push_str(paragraph);
}

/// Paragraphs are runs of lines separated by at least one whitespace-only line
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                paragraphs.push(lines.join("\n"));
                lines.clear();
            }
        } else {
            lines.push(line);
        }
    }
    if !lines.is_empty() {
        paragraphs.push(lines.join("\n"));
    }

    paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn is_sentence_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '.' | '!' | '?')
}

/// Split on runs of terminal punctuation; the punctuation and any following
/// whitespace stay attached to the sentence they end.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !is_sentence_terminator(c) {
            continue;
        }

        while let Some(&(_, next)) = chars.peek() {
            if is_sentence_terminator(next) || next.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        let end = chars.peek().map_or(text.len(), |&(idx, _)| idx);
        if let Some(sentence) = text.get(start..end) {
            sentences.push(sentence);
        }
        start = end;
    }

    if let Some(rest) = text.get(start..) {
        sentences.push(rest);
    }

    sentences.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Estimate token count using a simple heuristic.
/// CJK characters count as one token each; other text is word based.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    let cjk_count = text.chars().filter(|c| is_cjk(*c)).count();
    let word_count = text
        .split(|c: char| c.is_whitespace() || is_cjk(c))
        .filter(|w| !w.is_empty())
        .count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    cjk_count + (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{3040}'..='\u{30FF}')
}
