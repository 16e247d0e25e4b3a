//! Line-aware overlapping chunker
//!
//! Splits a text buffer into ordered chunks sized in characters, grown
//! toward a target and hard-capped, with configurable overlap between
//! successive chunks. Line numbers are 1-based positions in the
//! original buffer; a chunk's content spans its line range inclusive of
//! any overlap.

use std::path::PathBuf;

use crate::hash;

/// Chunking options. Lengths are in characters, not bytes.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Preferred chunk size; chunks grow to this when possible
    pub target_chars: usize,
    /// Hard cap; no chunk content exceeds this
    pub max_chars: usize,
    /// A buffer smaller than this yields a single chunk
    pub min_chars: usize,
    /// Fraction of `target_chars` shared between successive chunks
    pub overlap_ratio: f32,
    /// Snap boundaries to line starts
    pub respect_line_breaks: bool,
    /// In character mode, avoid splitting inside a word
    pub respect_word_boundaries: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            target_chars: 1500,
            max_chars: 3000,
            min_chars: 64,
            overlap_ratio: 0.1,
            respect_line_breaks: true,
            respect_word_boundaries: true,
        }
    }
}

impl ChunkOptions {
    /// Overlap in characters, derived from the ratio. The ratio is
    /// clamped to [0, 0.5] so overlap can never dominate a chunk.
    fn overlap_chars(&self) -> usize {
        (self.target_chars as f32 * self.overlap_ratio.clamp(0.0, 0.5)) as usize
    }
}

/// Identity of the file being chunked; feeds chunk id derivation.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    /// Repository alias (human label of the store)
    pub alias: String,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// Content hash of the full buffer
    pub file_hash: String,
}

/// A contiguous, line-annotated slice of a source file.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Stable id derived from (alias, path, ordinal, file hash)
    pub chunk_id: String,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub content: String,
    /// 1-based first line of `content` in the original buffer
    pub start_line: u32,
    /// 1-based last line, inclusive
    pub end_line: u32,
    pub size_chars: usize,
    pub estimated_tokens: usize,
    /// Position of this chunk within its file
    pub ordinal: u32,
}

/// Rough token estimate used for batching budgets only. Providers may
/// substitute their own estimate.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Split a buffer into ordered chunks.
///
/// An empty buffer yields no chunks; a buffer smaller than `min_chars`
/// yields exactly one chunk spanning the full line range.
pub fn chunk(text: &str, source: &ChunkSource, options: &ChunkOptions) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let pieces = if text.chars().count() < options.min_chars.max(1) {
        vec![Piece {
            content: text.to_string(),
            start_line: 1,
            end_line: count_lines(text),
        }]
    } else if options.respect_line_breaks {
        split_by_lines(text, options)
    } else {
        split_by_chars(text, options)
    };

    pieces
        .into_iter()
        .enumerate()
        .map(|(ordinal, piece)| {
            let ordinal = ordinal as u32;
            let size_chars = piece.content.chars().count();
            Chunk {
                chunk_id: hash::chunk_id(
                    &source.alias,
                    &source.relative_path,
                    ordinal,
                    &source.file_hash,
                ),
                relative_path: source.relative_path.clone(),
                absolute_path: source.absolute_path.clone(),
                estimated_tokens: estimate_tokens(&piece.content),
                content: piece.content,
                start_line: piece.start_line,
                end_line: piece.end_line,
                size_chars,
                ordinal,
            }
        })
        .collect()
}

struct Piece {
    content: String,
    start_line: u32,
    end_line: u32,
}

/// Number of lines in a buffer; a trailing newline does not open a new
/// line.
fn count_lines(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let newlines = text.bytes().filter(|b| *b == b'\n').count() as u32;
    if text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

/// Line mode: boundaries land on line starts, overlap walks whole lines
/// back from the split point.
fn split_by_lines(text: &str, options: &ChunkOptions) -> Vec<Piece> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let line_chars: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();
    let overlap = options.overlap_chars();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        // Grow toward target without crossing max
        let mut end = start;
        let mut acc = 0usize;
        while end < lines.len() {
            let len = line_chars[end];
            if acc > 0 && (acc + len > options.max_chars || acc >= options.target_chars) {
                break;
            }
            acc += len;
            end += 1;
        }

        // A single line beyond max gets split on its own
        if line_chars[start] > options.max_chars {
            let line_no = (start + 1) as u32;
            for segment in split_long_line(lines[start], options) {
                pieces.push(Piece {
                    content: segment,
                    start_line: line_no,
                    end_line: line_no,
                });
            }
            start += 1;
            continue;
        }

        pieces.push(Piece {
            content: lines[start..end].concat(),
            start_line: (start + 1) as u32,
            end_line: end as u32,
        });

        if end >= lines.len() {
            break;
        }

        // Walk back whole lines worth up to the overlap budget, always
        // keeping forward progress
        let mut next = end;
        let mut back = 0usize;
        while next > start + 1 && back + line_chars[next - 1] <= overlap {
            next -= 1;
            back += line_chars[next];
        }
        start = next;
    }

    pieces
}

/// Character mode: fixed stride with optional word-boundary snapping.
fn split_by_chars(text: &str, options: &ChunkOptions) -> Vec<Piece> {
    let chars: Vec<char> = text.chars().collect();
    // Char offset → 1-based line number, computed incrementally
    let mut line_at = Vec::with_capacity(chars.len());
    let mut line = 1u32;
    for &c in &chars {
        line_at.push(line);
        if c == '\n' {
            line += 1;
        }
    }

    let overlap = options.overlap_chars();
    let target = options.target_chars.max(1);
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + target).min(chars.len());
        if options.respect_word_boundaries && end < chars.len() {
            // Back off to the last whitespace inside the window
            let window_start = start + target / 2;
            if let Some(ws) = (window_start..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws + 1;
            }
        }

        let content: String = chars[start..end].iter().collect();
        pieces.push(Piece {
            start_line: line_at[start],
            end_line: line_at[end - 1],
            content,
        });

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    pieces
}

/// Split one oversized line at word boundaries where possible.
fn split_long_line(line: &str, options: &ChunkOptions) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut segments = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = (start + options.max_chars).min(chars.len());
        if options.respect_word_boundaries && end < chars.len() {
            let floor = start + options.max_chars / 2;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws + 1;
            }
        }
        segments.push(chars[start..end].iter().collect());
        start = end;
    }
    segments
}
