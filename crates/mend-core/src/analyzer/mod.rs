//! CodeAnalyzer: context, enclosing structure and bug signals for one line.
//!
//! Structure comes from tree-sitter when a grammar is available and the
//! source parses; otherwise a regex scan produces a best-effort result that
//! is explicitly marked as heuristic.

pub mod heuristic;
pub mod signals;

use crate::bug::BugKind;
use crate::error::InputError;
use crate::language::Language;
use crate::parser;
use heuristic::HeuristicScanner;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use signals::BugSignals;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lines of context kept on each side of the bug line
pub const CONTEXT_RADIUS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Function,
    Method,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub kind: DefinitionKind,
    pub start_line: usize,
    pub end_line: usize,
}

impl Definition {
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn is_class(&self) -> bool {
        self.kind == DefinitionKind::Class
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub target: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub callee: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub text: String,
    pub line: usize,
}

/// Structure collected from a syntax tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstInfo {
    pub functions: Vec<Definition>,
    pub classes: Vec<Definition>,
    pub assignments: Vec<Assignment>,
    pub calls: Vec<CallSite>,
    pub imports: Vec<Import>,
}

/// Structure recovered by line scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicInfo {
    pub functions: Vec<Definition>,
    pub classes: Vec<Definition>,
    pub imports: Vec<Import>,
    /// Why the grammar could not be used, if one exists for the language
    pub parsing_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StructureAnalysis {
    Parsed(AstInfo),
    Heuristic(HeuristicInfo),
}

impl StructureAnalysis {
    /// Every function, method and class definition.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        let (functions, classes) = match self {
            StructureAnalysis::Parsed(info) => (&info.functions, &info.classes),
            StructureAnalysis::Heuristic(info) => (&info.functions, &info.classes),
        };
        functions.iter().chain(classes.iter())
    }

    pub fn imports(&self) -> &[Import] {
        match self {
            StructureAnalysis::Parsed(info) => &info.imports,
            StructureAnalysis::Heuristic(info) => &info.imports,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(self, StructureAnalysis::Heuristic(_))
    }

    pub fn parsing_error(&self) -> Option<&str> {
        match self {
            StructureAnalysis::Parsed(_) => None,
            StructureAnalysis::Heuristic(info) => info.parsing_error.as_deref(),
        }
    }

    /// Innermost definition whose span covers `line`.
    pub fn containing(&self, line: usize) -> Option<&Definition> {
        self.definitions()
            .filter(|d| d.contains(line))
            .max_by(|a, b| {
                a.start_line
                    .cmp(&b.start_line)
                    .then_with(|| b.end_line.cmp(&a.end_line))
            })
    }
}

/// Lines around the bug, clamped to the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub start_line: usize,
    pub end_line: usize,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub file_path: String,
    pub language: Language,
    pub bug_type: BugKind,
    pub bug_line: usize,
    pub line_text: String,
    pub context: ContextWindow,
    pub structure: StructureAnalysis,
    pub containing_function: Option<Definition>,
    /// `None` when the bug-specific pattern was not found
    pub signals: Option<BugSignals>,
    /// One indentation level as used by this file
    pub indent_unit: String,
}

/// Per-file result of a folder scan
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub language: Language,
    pub mode: &'static str,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub parsing_error: Option<String>,
}

pub struct CodeAnalyzer {
    scanner: HeuristicScanner,
}

impl Default for CodeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeAnalyzer {
    pub fn new() -> Self {
        Self {
            scanner: HeuristicScanner::new(),
        }
    }

    /// Analyze `file_text` around `bug_line` (1-based).
    pub fn analyze(
        &self,
        file_path: &str,
        file_text: &str,
        bug_line: usize,
        bug_type: BugKind,
    ) -> Result<Analysis, InputError> {
        let lines: Vec<&str> = file_text.lines().collect();
        if bug_line == 0 || bug_line > lines.len() {
            return Err(InputError::LineOutOfRange {
                path: file_path.to_string(),
                line: bug_line,
                total: lines.len(),
            });
        }

        let language = Language::from_path(file_path);
        let structure = self.structure(file_text, language, Some(Path::new(file_path)));
        if let Some(reason) = structure.parsing_error() {
            debug!("{}: falling back to line scan ({})", file_path, reason);
        }
        let containing_function = structure.containing(bug_line).cloned();
        let signals = extract_signals(&lines, bug_line, bug_type, language);

        Ok(Analysis {
            file_path: file_path.to_string(),
            language,
            bug_type,
            bug_line,
            line_text: lines[bug_line - 1].to_string(),
            context: context_window(&lines, bug_line),
            structure,
            containing_function,
            signals,
            indent_unit: detect_indent_unit(file_text),
        })
    }

    /// Parse when possible, scan lines otherwise. Never fails.
    pub fn structure(
        &self,
        content: &str,
        language: Language,
        path: Option<&Path>,
    ) -> StructureAnalysis {
        if !language.has_parser() {
            return StructureAnalysis::Heuristic(self.scanner.scan(content, language));
        }
        match parser::parse_clean(content, language, path) {
            Ok(tree) => {
                StructureAnalysis::Parsed(parser::extract_structure(&tree, content, language))
            }
            Err(err) => {
                let mut info = self.scanner.scan(content, language);
                info.parsing_error = Some(err.to_string());
                StructureAnalysis::Heuristic(info)
            }
        }
    }

    /// Innermost function or class covering `line`, if any.
    pub fn find_containing_function(
        &self,
        file_text: &str,
        line: usize,
        language: Language,
    ) -> Option<Definition> {
        self.structure(file_text, language, None)
            .containing(line)
            .cloned()
    }
}

fn extract_signals(
    lines: &[&str],
    bug_line: usize,
    bug_type: BugKind,
    language: Language,
) -> Option<BugSignals> {
    let text = lines.get(bug_line - 1)?;
    match bug_type {
        BugKind::NullPointer => signals::null_deref(text, bug_line).map(BugSignals::NullDeref),
        BugKind::ResourceLeak => {
            signals::resource_acquisition(lines, bug_line).map(BugSignals::ResourceLeak)
        }
        BugKind::SqlInjection => {
            signals::sql_concatenation(lines, bug_line, language).map(BugSignals::SqlInjection)
        }
        BugKind::HardcodedCredentials => {
            signals::credential_assignment(text, bug_line).map(BugSignals::HardcodedCredential)
        }
        BugKind::ExceptionSwallowing => signals::swallowed_handler(lines, bug_line, language)
            .map(BugSignals::ExceptionSwallowing),
        BugKind::Generic => None,
    }
}

fn context_window(lines: &[&str], bug_line: usize) -> ContextWindow {
    let start_line = bug_line.saturating_sub(CONTEXT_RADIUS).max(1);
    let end_line = (bug_line + CONTEXT_RADIUS).min(lines.len());
    ContextWindow {
        start_line,
        end_line,
        lines: lines[start_line - 1..end_line]
            .iter()
            .map(|l| l.to_string())
            .collect(),
    }
}

/// Indentation of the first indented line: a tab, or its run of spaces.
pub fn detect_indent_unit(content: &str) -> String {
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('\t') {
            return "\t".to_string();
        }
        let spaces = line.len() - line.trim_start_matches(' ').len();
        if spaces > 0 {
            return " ".repeat(spaces);
        }
    }
    "    ".to_string()
}

/// Structure summaries for many files, computed in parallel.
pub fn summarize_files(files: &[(PathBuf, String)]) -> Vec<FileSummary> {
    let analyzer = CodeAnalyzer::new();
    files
        .par_iter()
        .map(|(path, content)| {
            let language = Language::from_path(path);
            let structure = analyzer.structure(content, language, Some(path));
            let (mode, functions, classes) = match &structure {
                StructureAnalysis::Parsed(info) => {
                    ("parsed", info.functions.len(), info.classes.len())
                }
                StructureAnalysis::Heuristic(info) => {
                    ("heuristic", info.functions.len(), info.classes.len())
                }
            };
            FileSummary {
                path: path.display().to_string(),
                language,
                mode,
                functions,
                classes,
                imports: structure.imports().len(),
                parsing_error: structure.parsing_error().map(str::to_string),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PY: &str = "import os\n\nclass Store:\n    def get(self, d):\n        value = d.get('k')\n        return value\n\ndef top():\n    return 1\n";

    #[test]
    fn test_analyze_parsed_python() {
        let analysis = CodeAnalyzer::new()
            .analyze("store.py", PY, 5, BugKind::NullPointer)
            .unwrap();

        assert_eq!(analysis.language, Language::Python);
        assert!(!analysis.structure.is_heuristic());
        let func = analysis.containing_function.unwrap();
        assert_eq!(func.name, "get");
        assert_eq!((func.start_line, func.end_line), (4, 6));
        assert_eq!(analysis.indent_unit, "    ");
        match analysis.signals {
            Some(BugSignals::NullDeref(ref sig)) => assert_eq!(sig.variable, "d"),
            ref other => panic!("unexpected signals {:?}", other),
        }
    }

    #[test]
    fn test_context_window_clamps() {
        let content: String = (1..=40).map(|i| format!("x{} = {}\n", i, i)).collect();
        let analysis = CodeAnalyzer::new()
            .analyze("big.py", &content, 3, BugKind::Generic)
            .unwrap();
        assert_eq!(analysis.context.start_line, 1);
        assert_eq!(analysis.context.end_line, 18);
        assert_eq!(analysis.context.lines.len(), 18);

        let tail = CodeAnalyzer::new()
            .analyze("big.py", &content, 39, BugKind::Generic)
            .unwrap();
        assert_eq!((tail.context.start_line, tail.context.end_line), (24, 40));
    }

    #[test]
    fn test_parse_failure_falls_back_to_heuristic() {
        let broken = "def ok():\n    return 1\n\ndef broken(:\n    pass\n";
        let analysis = CodeAnalyzer::new()
            .analyze("broken.py", broken, 2, BugKind::Generic)
            .unwrap();

        assert!(analysis.structure.is_heuristic());
        assert!(analysis.structure.parsing_error().is_some());
        assert_eq!(analysis.containing_function.unwrap().name, "ok");
    }

    #[test]
    fn test_line_out_of_range() {
        let err = CodeAnalyzer::new()
            .analyze("a.py", "x = 1\n", 4, BugKind::Generic)
            .unwrap_err();
        assert!(matches!(err, InputError::LineOutOfRange { total: 1, .. }));
    }

    #[test]
    fn test_innermost_definition_wins() {
        let analyzer = CodeAnalyzer::new();
        let inner = analyzer.find_containing_function(PY, 5, Language::Python).unwrap();
        assert_eq!(inner.name, "get");
        let class = analyzer.find_containing_function(PY, 3, Language::Python).unwrap();
        assert!(class.is_class());
        assert!(analyzer.find_containing_function(PY, 1, Language::Python).is_none());
    }

    #[test]
    fn test_detect_indent_unit() {
        assert_eq!(detect_indent_unit("a\n  b\n"), "  ");
        assert_eq!(detect_indent_unit("a\n\tb\n"), "\t");
        assert_eq!(detect_indent_unit("a\n"), "    ");
    }

    #[test]
    fn test_summarize_files_keeps_order() {
        let files = vec![
            (PathBuf::from("a.py"), "def f():\n    pass\n".to_string()),
            (PathBuf::from("b.java"), "class B {\n}\n".to_string()),
        ];
        let summaries = summarize_files(&files);
        assert_eq!(summaries[0].mode, "parsed");
        assert_eq!(summaries[0].functions, 1);
        assert_eq!(summaries[1].mode, "heuristic");
        assert_eq!(summaries[1].classes, 1);
    }
}
