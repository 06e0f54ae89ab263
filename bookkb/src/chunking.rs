//! Document chunking.
//!
//! Splits raw document text into bounded, overlapping segments. Scanned-book
//! text frequently arrives with its paragraph structure destroyed by OCR, so
//! normalization heuristically reinserts paragraph breaks before splitting.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::document::{Chunk, Document};
use crate::error::{KbError, Result};

/// Chunks shorter than this are dropped by the post-filter in packed modes.
const MIN_CHUNK_CHARS: usize = 50;

/// How text is split into segments before packing into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Split on blank lines; each paragraph becomes a chunk.
    #[default]
    Paragraph,
    /// Split on sentence-ending punctuation; sentences are packed greedily.
    Sentence,
    /// Fixed-size character windows with overlap.
    Character,
    /// Paragraphs first; paragraphs longer than the chunk size are re-split
    /// into sentences and packed.
    Hybrid,
    /// Pick paragraph, sentence, or character splitting from the text shape.
    Auto,
}

/// Splits document text into chunks.
///
/// Sizes are measured in characters. Chunk IDs are derived as
/// `{document_id}_{index}` and are stable across repeated runs.
///
/// # Example
///
/// ```rust,ignore
/// use bookkb::{Chunker, SplitStrategy};
///
/// let chunker = Chunker::new(1000, 200, SplitStrategy::Paragraph)?;
/// let chunks = chunker.chunk_document(&document);
/// ```
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    strategy: SplitStrategy,
    space_run: Regex,
    paragraph_break: Regex,
    reinsert_break: Regex,
}

impl Chunker {
    /// Create a new `Chunker`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if `chunk_overlap >= chunk_size` or
    /// `chunk_size == 0`.
    pub fn new(chunk_size: usize, chunk_overlap: usize, strategy: SplitStrategy) -> Result<Self> {
        if chunk_size == 0 {
            return Err(KbError::Config("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(KbError::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| KbError::Chunking(format!("invalid pattern: {e}")))
        };
        Ok(Self {
            chunk_size,
            chunk_overlap,
            strategy,
            space_run: compile(r"[ \t]+")?,
            paragraph_break: compile(r"\n\s*\n")?,
            reinsert_break: compile(r"([.!?])[ \t]+(\p{Lu})")?,
        })
    }

    /// The configured split strategy.
    pub fn strategy(&self) -> SplitStrategy {
        self.strategy
    }

    /// A copy of this chunker with different size limits.
    pub fn with_limits(&self, chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, self.strategy)
    }

    /// Split text into chunks of at most `chunk_size` characters.
    ///
    /// Empty input yields an empty vec. If post-filtering removes every
    /// candidate chunk, a single truncated chunk of the normalized text is
    /// returned instead so a document is never silently lost.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let normalized = self.normalize(text);
        if normalized.is_empty() {
            warn!("empty text passed to chunker");
            return Vec::new();
        }

        let strategy = self.resolve_strategy(&normalized);
        let (chunks, packed) = match strategy {
            SplitStrategy::Character => {
                (hard_split(&normalized, self.chunk_size, self.chunk_overlap), true)
            }
            SplitStrategy::Sentence => {
                let segments = split_sentences(&normalized);
                if segments.is_empty() {
                    (hard_split(&normalized, self.chunk_size, self.chunk_overlap), true)
                } else {
                    (self.pack_segments(self.hard_split_oversized(segments)), true)
                }
            }
            SplitStrategy::Paragraph => {
                let paragraphs = self.split_paragraphs(&normalized);
                if paragraphs.is_empty() {
                    (hard_split(&normalized, self.chunk_size, self.chunk_overlap), true)
                } else {
                    (self.hard_split_oversized(paragraphs), false)
                }
            }
            SplitStrategy::Hybrid => {
                let paragraphs = self.split_paragraphs(&normalized);
                if paragraphs.is_empty() {
                    (hard_split(&normalized, self.chunk_size, self.chunk_overlap), true)
                } else {
                    let mut out = Vec::new();
                    for paragraph in paragraphs {
                        if char_len(&paragraph) <= self.chunk_size {
                            out.push(paragraph);
                        } else {
                            let sentences = split_sentences(&paragraph);
                            if sentences.is_empty() {
                                out.extend(hard_split(
                                    &paragraph,
                                    self.chunk_size,
                                    self.chunk_overlap,
                                ));
                            } else {
                                out.extend(
                                    self.pack_segments(self.hard_split_oversized(sentences)),
                                );
                            }
                        }
                    }
                    (out, false)
                }
            }
            // resolve_strategy never returns Auto
            SplitStrategy::Auto => unreachable!("auto strategy must be resolved before splitting"),
        };

        // Packed modes produce merge artifacts worth filtering; paragraph
        // modes keep whole paragraphs even when short.
        let filtered: Vec<String> = if packed {
            chunks.into_iter().filter(|c| char_len(c) >= MIN_CHUNK_CHARS).collect()
        } else {
            chunks
        };

        if filtered.is_empty() {
            debug!("all candidate chunks filtered, falling back to a single truncated chunk");
            return vec![truncate_chars(&normalized, self.chunk_size)];
        }

        debug!(chunk_count = filtered.len(), "chunked text");
        filtered
    }

    /// Split a document into [`Chunk`]s with inherited metadata.
    ///
    /// Each chunk's metadata carries `document_id`, `chunk_index`, and
    /// `chunk_count` in addition to the document's own metadata. IDs are
    /// `{document_id}_{index}`, identical across repeated runs.
    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        let texts = self.chunk_text(&document.text);
        let chunk_count = texts.len();

        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut metadata = document.metadata.clone();
                metadata.insert("document_id".to_string(), json!(document.id));
                metadata.insert("chunk_index".to_string(), json!(i));
                metadata.insert("chunk_count".to_string(), json!(chunk_count));
                Chunk { id: format!("{}_{i}", document.id), text, metadata }
            })
            .collect()
    }

    /// Normalize whitespace and reinsert lost paragraph breaks.
    ///
    /// When the text already contains blank lines the structure is trusted.
    /// Otherwise a break is inserted after sentence-ending punctuation
    /// followed by a capital letter, which recovers most OCR flattening.
    fn normalize(&self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n");
        let collapsed = self.space_run.replace_all(&unified, " ");
        let trimmed = collapsed.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        if self.paragraph_break.is_match(trimmed) {
            trimmed.to_string()
        } else {
            self.reinsert_break.replace_all(trimmed, "${1}\n\n${2}").into_owned()
        }
    }

    fn resolve_strategy(&self, text: &str) -> SplitStrategy {
        match self.strategy {
            SplitStrategy::Auto => {
                let paragraphs = self.split_paragraphs(text).len();
                if paragraphs > 5 {
                    debug!(paragraphs, "auto split resolved to paragraph");
                    SplitStrategy::Paragraph
                } else {
                    let sentences = split_sentences(text).len();
                    if sentences > 10 {
                        debug!(sentences, "auto split resolved to sentence");
                        SplitStrategy::Sentence
                    } else {
                        debug!("auto split resolved to character");
                        SplitStrategy::Character
                    }
                }
            }
            other => other,
        }
    }

    fn split_paragraphs(&self, text: &str) -> Vec<String> {
        self.paragraph_break
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Replace segments longer than the chunk size with fixed-size windows.
    fn hard_split_oversized(&self, segments: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(segments.len());
        for segment in segments {
            if char_len(&segment) > self.chunk_size {
                out.extend(hard_split(&segment, self.chunk_size, self.chunk_overlap));
            } else {
                out.push(segment);
            }
        }
        out
    }

    /// Greedily pack segments into chunks of at most `chunk_size` characters,
    /// seeding each new chunk with the overlap tail of the previous one.
    fn pack_segments(&self, segments: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for segment in segments {
            if !current.is_empty()
                && char_len(&current) + char_len(&segment) + 1 > self.chunk_size
            {
                let mut seed = overlap_tail(&current, self.chunk_overlap);
                // A seed the next segment cannot fit beside would only push
                // the chunk past the size limit with duplicated text.
                if char_len(&seed) + char_len(&segment) + 1 > self.chunk_size {
                    seed.clear();
                }
                chunks.push(std::mem::take(&mut current));
                current = seed;
            }

            if current.is_empty() {
                current = segment;
            } else {
                current.push(' ');
                current.push_str(&segment);
            }

            if char_len(&current) >= self.chunk_size {
                chunks.push(std::mem::take(&mut current));
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

/// Number of characters in a string.
fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First `limit` characters of a string.
fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Split text into fixed-size character windows with overlap.
fn hard_split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

/// The trailing `overlap` characters of a chunk, broken at a word boundary
/// when one exists within the overlap window.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = chunk.chars().collect();
    if chars.len() <= overlap {
        return String::new();
    }
    let tail: String = chars[chars.len() - overlap..].iter().collect();
    match tail.find(' ') {
        Some(pos) if pos > 0 && pos + 1 < tail.len() => tail[pos + 1..].to_string(),
        _ => tail,
    }
}

/// Split text after sentence-ending punctuation followed by whitespace,
/// keeping the punctuation attached to the preceding sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}
