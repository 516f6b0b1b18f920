//! Source language detection and per-language syntax facts used by the
//! analyzer and the fix templates.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    JavaScript,
    TypeScript,
    Ruby,
    Go,
    C,
    Cpp,
    CSharp,
    Php,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyi" => Language::Python,
            "java" => Language::Java,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "rb" => Language::Ruby,
            "go" => Language::Go,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "cs" => Language::CSharp,
            "php" => Language::Php,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Ruby => "ruby",
            Language::Go => "go",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Unknown => "unknown",
        }
    }

    /// Whether a tree-sitter grammar is bundled for this language.
    pub fn has_parser(&self) -> bool {
        matches!(
            self,
            Language::Python | Language::JavaScript | Language::TypeScript | Language::Go
        )
    }

    /// Blocks are delimited by indentation rather than braces.
    pub fn is_indentation_scoped(&self) -> bool {
        matches!(self, Language::Python)
    }

    /// Blocks close with a bare `end` keyword.
    pub fn uses_end_keyword(&self) -> bool {
        matches!(self, Language::Ruby)
    }

    pub fn uses_braces(&self) -> bool {
        !self.is_indentation_scoped() && !self.uses_end_keyword()
    }

    pub fn line_comment(&self) -> &'static str {
        match self {
            Language::Python | Language::Ruby | Language::Unknown => "#",
            _ => "//",
        }
    }

    /// Literal used for "no value" in guards and default returns.
    pub fn null_literal(&self) -> &'static str {
        match self {
            Language::Python => "None",
            Language::Ruby => "nil",
            Language::Go => "nil",
            Language::C => "NULL",
            Language::Cpp => "nullptr",
            _ => "null",
        }
    }

    /// Statements end with a semicolon.
    pub fn needs_semicolon(&self) -> bool {
        matches!(
            self,
            Language::Java
                | Language::JavaScript
                | Language::TypeScript
                | Language::C
                | Language::Cpp
                | Language::CSharp
                | Language::Php
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
