//! Line-based structure scanning for sources the grammars cannot handle.

use super::{Definition, DefinitionKind, HeuristicInfo, Import};
use crate::language::Language;
use regex::Regex;

struct PatternSet {
    functions: Vec<Regex>,
    classes: Vec<Regex>,
    imports: Vec<Regex>,
}

impl PatternSet {
    fn build(functions: &[&str], classes: &[&str], imports: &[&str]) -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect()
        };
        Self {
            functions: compile(functions),
            classes: compile(classes),
            imports: compile(imports),
        }
    }
}

/// Regex scanner for function/class signatures and imports
pub struct HeuristicScanner {
    python: PatternSet,
    ruby: PatternSet,
    script: PatternSet,
    go: PatternSet,
    php: PatternSet,
    c_family: PatternSet,
}

/// Words that start a statement and can never name a definition
const STATEMENT_WORDS: &[&str] = &[
    "if", "else", "for", "while", "switch", "catch", "return", "new", "throw", "do", "case",
    "sizeof", "delete", "await", "yield",
];

impl Default for HeuristicScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicScanner {
    pub fn new() -> Self {
        let python = PatternSet::build(
            &[r"^\s*(?:async\s+)?def\s+(?P<name>\w+)"],
            &[r"^\s*class\s+(?P<name>\w+)"],
            &[r"^\s*import\s+\S", r"^\s*from\s+\S+\s+import\s"],
        );

        let ruby = PatternSet::build(
            &[r"^\s*def\s+(?:self\.)?(?P<name>[\w?!=]+)"],
            &[r"^\s*(?:class|module)\s+(?P<name>[\w:]+)"],
            &[r"^\s*require(?:_relative)?\s"],
        );

        // JavaScript/TypeScript: function name(, const name = (, =>
        let script = PatternSet::build(
            &[
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+(?P<name>\w+)",
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>\w+)\s*=\s*(?:async\s+)?\(",
                r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>\w+)\s*=\s*(?:async\s+)?\w+\s*=>",
                r"^\s*(?:(?:public|private|protected|static|async|readonly)\s+)*(?P<name>\w+)\s*\([^)]*\)\s*(?::\s*[^{]+)?\{\s*$",
            ],
            &[r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface)\s+(?P<name>\w+)"],
            &[r"^\s*import\s", r"\brequire\s*\("],
        );

        // Go: func name(, func (receiver) name(
        let go = PatternSet::build(
            &[r"^\s*func\s+(?:\([^)]*\)\s*)?(?P<name>\w+)"],
            &[r"^\s*type\s+(?P<name>\w+)\s+(?:struct|interface)\b"],
            &[r"^\s*import\b"],
        );

        let php = PatternSet::build(
            &[r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+(?P<name>\w+)"],
            &[r"^\s*(?:(?:abstract|final)\s+)?(?:class|interface|trait)\s+(?P<name>\w+)"],
            &[r"^\s*(?:use|require|require_once|include|include_once)\b"],
        );

        // Java/C#/C/C++: type name( ... ) {
        let c_family = PatternSet::build(
            &[
                r"^\s*(?:[\w:<>*&\[\],.]+\s+)+[*&]?(?P<name>[A-Za-z_][\w:~]*)\s*\([^;]*\)\s*(?:const\s*)?(?:throws\s+[\w.,\s]+)?\{?\s*$",
            ],
            &[
                r"^\s*(?:(?:public|private|protected|internal|static|abstract|final|sealed|partial)\s+)*(?:class|interface|struct|enum|record)\s+(?P<name>\w+)",
            ],
            &[
                r"^\s*import\s+[\w.*]+\s*;",
                r"^\s*using\s+[\w.]+\s*;",
                r"^\s*#\s*include\b",
            ],
        );

        Self {
            python,
            ruby,
            script,
            go,
            php,
            c_family,
        }
    }

    fn patterns_for(&self, language: Language) -> Vec<&PatternSet> {
        match language {
            Language::Python => vec![&self.python],
            Language::Ruby => vec![&self.ruby],
            Language::JavaScript | Language::TypeScript => vec![&self.script],
            Language::Go => vec![&self.go],
            Language::Php => vec![&self.php],
            Language::Java | Language::C | Language::Cpp | Language::CSharp => vec![&self.c_family],
            Language::Unknown => vec![&self.python, &self.script, &self.c_family],
        }
    }

    /// Scan `content` line by line. Never fails; unmatched lines are ignored.
    pub fn scan(&self, content: &str, language: Language) -> HeuristicInfo {
        let lines: Vec<&str> = content.lines().collect();
        let sets = self.patterns_for(language);
        let mut info = HeuristicInfo::default();

        for (idx, line) in lines.iter().enumerate() {
            let first_word = line.split_whitespace().next().unwrap_or("");
            let first_word = first_word.trim_start_matches('}');
            if STATEMENT_WORDS.contains(&first_word) {
                continue;
            }

            if let Some(name) = first_capture(sets.iter().flat_map(|s| &s.classes), line) {
                info.classes.push(Definition {
                    name,
                    kind: DefinitionKind::Class,
                    start_line: idx + 1,
                    end_line: block_end(&lines, idx),
                });
            } else if let Some(name) = first_capture(sets.iter().flat_map(|s| &s.functions), line)
            {
                if STATEMENT_WORDS.contains(&name.as_str()) {
                    continue;
                }
                info.functions.push(Definition {
                    name,
                    kind: DefinitionKind::Function,
                    start_line: idx + 1,
                    end_line: block_end(&lines, idx),
                });
            } else if sets
                .iter()
                .flat_map(|s| &s.imports)
                .any(|re| re.is_match(line))
            {
                info.imports.push(Import {
                    text: line.trim().to_string(),
                    line: idx + 1,
                });
            }
        }

        info
    }
}

fn first_capture<'a>(patterns: impl Iterator<Item = &'a Regex>, line: &str) -> Option<String> {
    for re in patterns {
        if let Some(caps) = re.captures(line) {
            if let Some(name) = caps.name("name") {
                return Some(name.as_str().to_string());
            }
        }
    }
    None
}

/// Width of a line's leading whitespace, tabs counted as four columns.
pub fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Leading whitespace of a line, verbatim.
pub fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

/// Last line (1-based) of the block opened at `start_idx` (0-based).
///
/// The block ends before the first non-blank line indented at or below the
/// opening line. A closing `}` or `end` at the opening indentation belongs
/// to the block.
pub fn block_end(lines: &[&str], start_idx: usize) -> usize {
    let Some(opening) = lines.get(start_idx) else {
        return start_idx + 1;
    };
    let base = indent_width(opening);
    let mut last = start_idx + 1;
    let mut first_body_line = true;

    for (j, line) in lines.iter().enumerate().skip(start_idx + 1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent_width(line) <= base {
            // Allman-style opening brace on its own line
            if first_body_line && trimmed.starts_with('{') {
                last = j + 1;
                first_body_line = false;
                continue;
            }
            if trimmed.starts_with('}')
                || trimmed == "end"
                || trimmed.starts_with("end ")
                || trimmed.starts_with("end;")
            {
                last = j + 1;
            }
            break;
        }
        first_body_line = false;
        last = j + 1;
    }

    last
}
