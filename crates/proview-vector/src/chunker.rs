//! Overlapping text chunker.
//!
//! Splits extracted document text into spans of at most `max_chars`
//! characters. Every span after the first starts exactly `overlap_chars`
//! characters before the end of its predecessor, so dropping the first
//! `overlap_chars` characters of each later span and concatenating
//! reproduces the input text.
//!
//! Within a window the split point prefers a paragraph break, then a line
//! break, then a space, falling back to a hard cut at `max_chars`.

use proview_core::error::{ProviewError, Result};

/// Separators tried in order when choosing where a span ends.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// A contiguous span of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Position of the span within the document.
    pub index: usize,
    /// Start offset in characters (inclusive).
    pub start: usize,
    /// End offset in characters (exclusive).
    pub end: usize,
    pub text: String,
}

impl TextSpan {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Split `text` into overlapping spans.
///
/// Returns an empty sequence for empty input. Fails with `Validation` when
/// `max_chars` is zero or `overlap_chars >= max_chars`, since no forward
/// progress would be possible.
pub fn chunk(text: &str, max_chars: usize, overlap_chars: usize) -> Result<Vec<TextSpan>> {
    if max_chars == 0 {
        return Err(ProviewError::Validation("max_chars must be positive".to_string()));
    }
    if overlap_chars >= max_chars {
        return Err(ProviewError::Validation(format!(
            "overlap_chars ({}) must be smaller than max_chars ({})",
            overlap_chars, max_chars
        )));
    }

    // Byte offset of every char boundary, including the end of the text.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let total_chars = bounds.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < total_chars {
        let hard_end = (start + max_chars).min(total_chars);
        let end = if hard_end == total_chars {
            hard_end
        } else {
            preferred_end(text, &bounds, start + overlap_chars + 1, hard_end)
        };

        spans.push(TextSpan {
            index: spans.len(),
            start,
            end,
            text: text[bounds[start]..bounds[end]].to_string(),
        });

        if end == total_chars {
            break;
        }
        start = end - overlap_chars;
    }

    Ok(spans)
}

/// Rebuild the source text from spans produced with the same overlap.
pub fn reassemble(spans: &[TextSpan], overlap_chars: usize) -> String {
    let mut out = String::new();
    for (i, span) in spans.iter().enumerate() {
        if i == 0 {
            out.push_str(&span.text);
        } else {
            out.extend(span.text.chars().skip(overlap_chars));
        }
    }
    out
}

/// Pick the end of a span within `[min_end, hard_end]` (char offsets),
/// ending right after the highest-priority separator found there.
fn preferred_end(text: &str, bounds: &[usize], min_end: usize, hard_end: usize) -> usize {
    if min_end >= hard_end {
        return hard_end;
    }
    let window = &text[bounds[min_end]..bounds[hard_end]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let end_byte = bounds[min_end] + pos + sep.len();
            // Separators are ASCII, so `end_byte` is always a char boundary.
            if let Ok(end) = bounds.binary_search(&end_byte) {
                return end;
            }
        }
    }
    hard_end
}
