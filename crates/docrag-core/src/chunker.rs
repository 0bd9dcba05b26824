//! Overlapping, boundary-aware text splitting.
//!
//! Text is cut at the coarsest boundary that yields pieces below the target
//! size (paragraph, line, sentence, word) and pieces are then merged greedily
//! into windows. Consecutive windows share up to `chunk_overlap` characters of
//! trailing pieces. Text without any usable boundary falls back to fixed
//! character windows. All lengths count `char`s, not bytes.

use std::collections::VecDeque;

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::types::{ChunkCandidate, Segment};

const SENTENCE: &str = ". ";
const SEPARATORS: [&str; 4] = ["\n\n", "\n", SENTENCE, " "];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200 }
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "invalid chunking window: size={chunk_size} overlap={chunk_overlap}"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }
    pub fn chunk_overlap(&self) -> usize { self.chunk_overlap }

    /// Split every segment independently, copying its metadata onto each piece.
    pub fn split_segments(&self, segments: &[Segment]) -> Vec<ChunkCandidate> {
        segments
            .iter()
            .flat_map(|seg| {
                self.split_text(&seg.text)
                    .into_iter()
                    .map(|content| ChunkCandidate { content, metadata: seg.metadata.clone() })
            })
            .collect()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let Some(pos) = separators.iter().position(|sep| text.contains(sep)) else {
            return self.hard_split(text);
        };
        let separator = separators[pos];
        let finer = &separators[pos + 1..];

        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        let glue = joiner(separator);
        for piece in pieces(text, separator).into_iter().filter(|p| !p.trim().is_empty()) {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending, glue));
                pending.clear();
            }
            out.extend(self.split_recursive(piece, finer));
        }
        if !pending.is_empty() {
            out.extend(self.merge(&pending, glue));
        }
        out
    }

    /// Greedily pack pieces into windows of at most `chunk_size`, carrying a
    /// tail of at most `chunk_overlap` into the next window.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut windows = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joined = |current: &VecDeque<(&str, usize)>| if current.is_empty() { 0 } else { sep_len };
            if total + len + joined(&current) > self.chunk_size && !current.is_empty() {
                windows.push(join(&current, separator));
                // drop from the front until the carried tail fits the overlap
                // and leaves room for the incoming piece
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joined(&current) > self.chunk_size)
                {
                    let Some((_, front_len)) = current.pop_front() else { break };
                    total -= front_len + if current.is_empty() { 0 } else { sep_len };
                }
            }
            total += len + joined(&current);
            current.push_back((piece, len));
        }
        if !current.is_empty() {
            windows.push(join(&current, separator));
        }
        windows
    }

    /// Fixed windows of `chunk_size` chars advancing by `chunk_size - chunk_overlap`.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }
        let stride = self.chunk_size - self.chunk_overlap;
        let mut out = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        out
    }
}

/// Sentence pieces keep their full stop; other separators are dropped and
/// restored by the merge.
fn pieces<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator == SENTENCE {
        text.split_inclusive(SENTENCE).map(|p| p.strip_suffix(' ').unwrap_or(p)).collect()
    } else {
        text.split(separator).collect()
    }
}

fn joiner(separator: &str) -> &str {
    if separator == SENTENCE { " " } else { separator }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join(pieces: &VecDeque<(&str, usize)>, separator: &str) -> String {
    pieces.iter().map(|(p, _)| *p).collect::<Vec<_>>().join(separator)
}
