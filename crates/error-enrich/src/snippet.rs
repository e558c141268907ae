//! Context-window extraction from recovered original sources.

use crate::model::{SnippetLine, SourceSnippet};

/// Lines of context kept on each side of the error line.
pub const SNIPPET_CONTEXT_LINES: u32 = 5;
/// Per-line character cap; build output can hold minified one-liners.
pub const SNIPPET_LINE_CHARS: usize = 200;

/// Cuts a window of up to eleven lines around `error_line` (1-based).
/// Out-of-range lines, including 0, yield `None` rather than a guess.
pub fn extract_snippet(file: &str, source: &str, error_line: u32) -> Option<SourceSnippet> {
    if error_line == 0 {
        return None;
    }
    let rows: Vec<&str> = source.lines().collect();
    let total = rows.len() as u32;
    if error_line > total {
        return None;
    }
    let first = error_line.saturating_sub(SNIPPET_CONTEXT_LINES).max(1);
    let last = (error_line + SNIPPET_CONTEXT_LINES).min(total);
    let lines = (first..=last)
        .map(|line| SnippetLine {
            line,
            text: clip_line(rows[(line - 1) as usize]),
            is_error: line == error_line,
        })
        .collect();
    Some(SourceSnippet {
        file: file.to_string(),
        error_line,
        lines,
    })
}

fn clip_line(text: &str) -> String {
    let mut clipped: String = text.chars().take(SNIPPET_LINE_CHARS).collect();
    clipped.shrink_to_fit();
    clipped
}
