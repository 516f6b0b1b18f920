//! Applies line-level changes to an in-memory copy of a file.

use crate::error::TransformError;
use crate::model::{Change, ChangeKind};
use std::cmp::Reverse;

/// Number of lines as the patch model counts them.
pub fn line_count(text: &str) -> usize {
    text.lines().count()
}

/// Apply `changes` to `original` and return the new text.
///
/// Changes are applied from the bottom of the file up so that every change
/// still sees the original line numbers. When a replace/delete and an insert
/// share a start line the replace runs first, which leaves the inserted text
/// in front of the replacement. Line endings (LF or CRLF) and the presence
/// of a trailing newline are preserved.
pub fn apply_changes(original: &str, changes: &[Change]) -> Result<String, TransformError> {
    let newline = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let total = lines.len();

    for change in changes {
        check_bounds(change, total)?;
    }

    let mut ordered: Vec<&Change> = changes.iter().collect();
    ordered.sort_by_key(|c| (Reverse(c.start_line), c.is_insert()));

    for change in ordered {
        let replacement: Vec<String> = change.content.lines().map(str::to_string).collect();
        let start = change.start_line - 1;
        match change.kind {
            ChangeKind::ReplaceLines => {
                lines.splice(start..change.end_line, replacement);
            }
            ChangeKind::DeleteLines => {
                lines.drain(start..change.end_line);
            }
            ChangeKind::InsertLines => {
                lines.splice(start..start, replacement);
            }
        }
    }

    let mut out = lines.join(newline);
    let keep_trailing = original.ends_with('\n') || (original.is_empty() && !out.is_empty());
    if keep_trailing && !out.is_empty() {
        out.push_str(newline);
    }
    Ok(out)
}

fn check_bounds(change: &Change, total: usize) -> Result<(), TransformError> {
    if change.start_line == 0 {
        return Err(TransformError::OutOfRange {
            start: change.start_line,
            end: change.end_line,
            total,
        });
    }
    match change.kind {
        ChangeKind::InsertLines => {
            if change.start_line > total + 1 {
                return Err(TransformError::OutOfRange {
                    start: change.start_line,
                    end: change.start_line,
                    total,
                });
            }
        }
        ChangeKind::ReplaceLines | ChangeKind::DeleteLines => {
            if change.end_line < change.start_line {
                return Err(TransformError::InvertedRange {
                    start: change.start_line,
                    end: change.end_line,
                });
            }
            if change.end_line > total {
                return Err(TransformError::OutOfRange {
                    start: change.start_line,
                    end: change.end_line,
                    total,
                });
            }
        }
    }
    Ok(())
}
