use thiserror::Error;

/// A strategy or file that cannot be used to generate a fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("refusing to touch {0}: path leaves the working directory")]
    OutsideWorkspace(String),
    #[error("cannot read {path}: {message}")]
    Unreadable { path: String, message: String },
    #[error("line {line} is outside {path} ({total} lines)")]
    LineOutOfRange {
        path: String,
        line: usize,
        total: usize,
    },
    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),
    #[error("cannot generate {bug_type} fix: {reason}")]
    PatternNotFound { bug_type: String, reason: String },
}

/// A change that cannot be applied to the text it targets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("change at lines {start}-{end} is outside the file ({total} lines)")]
    OutOfRange {
        start: usize,
        end: usize,
        total: usize,
    },
    #[error("change has an inverted range {start}-{end}")]
    InvertedRange { start: usize, end: usize },
}
