//! Document/line model: CR/LF-normalized lines and file-relative offsets.
//!
//! Every line keeps its byte offsets into the original document so spans can
//! be highlighted against the source text without re-scanning it. Offsets
//! are resolved through a precomputed prefix-sum table rather than re-walked
//! on every lookup.

use serde::{Deserialize, Serialize};

/// A single line of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub index: usize,
    pub text: String,
}

impl Line {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A half-open candidate span `[start, end)` within a single line's text.
///
/// Spans are immutable values (`spec.md` §3); sanitizing or trimming a span
/// always produces a new one rather than mutating in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateSpan {
    pub start: usize,
    pub end: usize,
}

impl CandidateSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start < end, "candidate span must be non-empty: {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &CandidateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &CandidateSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn text<'a>(&self, line: &'a str) -> &'a str {
        &line[self.start..self.end]
    }

    pub fn is_whitespace_only(&self, line: &str) -> bool {
        self.text(line).trim().is_empty()
    }
}

/// CR/LF-normalized document split into lines, with a precomputed
/// line-start prefix-sum table mapping `(line, in_line_offset)` to a
/// document-relative character offset and back.
#[derive(Debug, Clone)]
pub struct Document {
    pub lines: Vec<Line>,
    /// `line_starts[i]` is the document offset of the first byte of line
    /// `i`; `line_starts[i+1] = line_starts[i] + len(line[i]) + 1` per
    /// `spec.md` §3 (the `+1` accounts for the newline separator, including
    /// a synthetic one after the final line so ranges stay half-open).
    line_starts: Vec<usize>,
}

impl Document {
    /// Splits `text` into lines after normalizing CRLF/CR to LF.
    pub fn new(text: &str) -> Self {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let lines: Vec<Line> = normalized
            .split('\n')
            .enumerate()
            .map(|(index, text)| Line {
                index,
                text: text.to_string(),
            })
            .collect();

        let mut line_starts = Vec::with_capacity(lines.len() + 1);
        let mut offset = 0;
        for line in &lines {
            line_starts.push(offset);
            offset += line.len() + 1;
        }
        line_starts.push(offset);

        Self { lines, line_starts }
    }

    pub fn len_lines(&self) -> usize {
        self.lines.len()
    }

    /// Document-relative character offset of the start of `line_index`.
    pub fn line_start(&self, line_index: usize) -> usize {
        self.line_starts[line_index]
    }

    /// Converts a `(line, in_line_offset)` pair to a document-relative
    /// offset.
    pub fn file_offset(&self, line_index: usize, in_line_offset: usize) -> usize {
        self.line_starts[line_index] + in_line_offset
    }

    /// Inverse of [`Document::file_offset`]: maps a document-relative
    /// offset back to `(line_index, in_line_offset)`.
    pub fn line_of_offset(&self, file_offset: usize) -> (usize, usize) {
        match self.line_starts.binary_search(&file_offset) {
            Ok(i) if i < self.lines.len() => (i, 0),
            Ok(i) => (i - 1, file_offset - self.line_starts[i - 1]),
            Err(0) => (0, file_offset),
            Err(i) => {
                let line = i - 1;
                (line, file_offset - self.line_starts[line])
            }
        }
    }
}
