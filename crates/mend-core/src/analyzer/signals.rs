//! Bug-specific extraction from source lines.
//!
//! Every extractor is a plain string/regex heuristic and returns `None` when
//! its pattern is not present; the generator treats that as "no fix".

use super::heuristic::{indent_width, leading_whitespace};
use crate::language::Language;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CALL_OR_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w$])((?:(?:self|this|\$this)(?:\.|->))?\$?[A-Za-z_]\w*)\s*\??(?:\.|->|\[|\()")
        .expect("valid regex")
});

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<indent>\s*)(?P<decl>(?:[\w<>\[\],.*&]+\s+)*?)(?P<var>\$?[A-Za-z_][\w.]*)(?:\s*,\s*[A-Za-z_]\w*)?\s*(?P<op>:=|=)\s*(?P<rhs>.+?)\s*(?P<semi>;?)\s*$",
    )
    .expect("valid regex")
});

static ACQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[^\w])(?:open|fopen|fsockopen|Open|OpenFile|Create|File\.open|File\.new|openSync|createReadStream|createWriteStream|socket|connect)\s*\(|\bnew\s+(?:File\w*|Buffered\w+|Stream\w+|\w*Reader|\w*Writer|Scanner|Socket|\w*Stream)\s*\(",
    )
    .expect("valid regex")
});

static CREDENTIAL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|passwd|pwd|secret|token|api_?key|access_?key|username|user_?name|credential)")
        .expect("valid regex")
});

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<q>["'])(?P<value>.*)["']$"#).expect("valid regex")
});

static PY_EXCEPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*except\b\s*(?P<ty>[\w.]+|\([^)]*\))?\s*(?:as\s+(?P<var>\w+))?\s*:")
        .expect("valid regex")
});

static RUBY_RESCUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*rescue\b\s*(?P<ty>[\w:]+)?\s*(?:=>\s*(?P<var>\w+))?").expect("valid regex")
});

static BRACE_CATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"catch\s*(?:\(\s*(?:(?P<ty>[\w.:|\\\s&*]+?)\s+)?\$?(?P<var>\w+)?\s*\))?\s*\{",
    )
    .expect("valid regex")
});

/// Words that can precede `(`/`.` without being the dereferenced value
const KEYWORDS: &[&str] = &[
    "if", "elif", "while", "for", "return", "not", "and", "or", "in", "is", "switch", "catch",
    "new", "await", "typeof", "yield", "print", "assert", "del", "throw", "else", "with",
];

/// What the analyzer extracted for a particular bug kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BugSignals {
    NullDeref(NullDeref),
    ResourceLeak(ResourceAcquisition),
    SqlInjection(SqlConcatenation),
    HardcodedCredential(CredentialAssignment),
    ExceptionSwallowing(SwallowedHandler),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullDeref {
    pub variable: String,
    pub line: usize,
}

/// A resource opened into a variable and the lines that use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAcquisition {
    pub variable: String,
    /// Declared type or keyword in front of the variable, if any
    pub declaration: String,
    pub expression: String,
    pub line: usize,
    /// Last line after the acquisition that mentions the variable
    pub last_use_line: usize,
    /// Explicit `close()` calls inside the usage span
    pub close_lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlConcatenation {
    pub variable: String,
    pub declaration: String,
    /// `=` or `:=`
    pub operator: String,
    pub semicolon: bool,
    /// The query with every concatenated value replaced by `?`
    pub query: String,
    pub quote: char,
    pub params: Vec<String>,
    pub line: usize,
    /// Line of the `execute(<variable>)`-style call, when found nearby
    pub execute_line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialAssignment {
    pub variable: String,
    pub declaration: String,
    pub value: String,
    pub line: usize,
    pub semicolon: bool,
}

impl CredentialAssignment {
    /// Environment variable name derived from the assigned identifier.
    pub fn env_key(&self) -> String {
        env_key(&self.variable)
    }
}

/// A catch/except handler and the span of lines it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwallowedHandler {
    pub handler_line: usize,
    pub end_line: usize,
    pub exception_type: Option<String>,
    pub exception_var: Option<String>,
    /// Handler line text up to and including its opening `{` (brace languages)
    pub head: String,
    /// Text from the closing `}` to the end of that line (brace languages)
    pub closing: String,
}

/// Base identifier of the first `var.attr`, `var[...]` or `var(...)` on a line.
pub fn null_deref(line_text: &str, line: usize) -> Option<NullDeref> {
    let code = strip_strings(line_text);
    for caps in CALL_OR_ACCESS.captures_iter(&code) {
        let ident = &caps[1];
        if KEYWORDS.contains(&ident) || ident.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        return Some(NullDeref {
            variable: ident.to_string(),
            line,
        });
    }
    None
}

/// Find a resource acquisition at `bug_line` or in the few lines above it.
pub fn resource_acquisition(lines: &[&str], bug_line: usize) -> Option<ResourceAcquisition> {
    let first = bug_line.saturating_sub(5).max(1);
    let line = (first..=bug_line)
        .rev()
        .find(|&n| lines.get(n - 1).is_some_and(|l| parse_acquisition(l).is_some()))?;
    let (declaration, variable, expression) = parse_acquisition(lines[line - 1])?;

    let base = indent_width(lines[line - 1]);
    let bare = variable.trim_start_matches('$');
    let mention = Regex::new(&format!(r"\b{}\b", regex::escape(bare))).ok()?;
    let close = Regex::new(&format!(r"\b{}\s*\.\s*(?:close|Close)\s*\(", regex::escape(bare))).ok()?;

    let mut last_use_line = line;
    let mut close_lines = Vec::new();
    for (idx, text) in lines.iter().enumerate().skip(line) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent_width(text) < base || (indent_width(text) == base && trimmed.starts_with('}')) {
            break;
        }
        if close.is_match(text) {
            close_lines.push(idx + 1);
        }
        if mention.is_match(text) {
            last_use_line = idx + 1;
        }
    }

    Some(ResourceAcquisition {
        variable,
        declaration,
        expression,
        line,
        last_use_line,
        close_lines,
    })
}

fn parse_acquisition(line: &str) -> Option<(String, String, String)> {
    let caps = ASSIGNMENT.captures(line)?;
    let rhs = caps.name("rhs")?.as_str();
    if caps.name("op")?.as_str().is_empty() || !ACQUIRE.is_match(rhs) {
        return None;
    }
    Some((
        caps.name("decl").map(|m| m.as_str().to_string()).unwrap_or_default(),
        caps.name("var")?.as_str().to_string(),
        rhs.to_string(),
    ))
}

/// Split `var = "..." + x + "..."` into a parameterized query.
pub fn sql_concatenation(
    lines: &[&str],
    bug_line: usize,
    language: Language,
) -> Option<SqlConcatenation> {
    let concat = if language == Language::Php { '.' } else { '+' };
    let text = lines.get(bug_line.checked_sub(1)?)?;
    let caps = ASSIGNMENT.captures(text)?;
    let variable = caps.name("var")?.as_str().to_string();
    let rhs = caps.name("rhs")?.as_str();

    let mut query = String::new();
    let mut params = Vec::new();
    let mut quote = None;
    for piece in split_outside_strings(rhs, concat) {
        let piece = piece.trim();
        if piece.is_empty() {
            return None;
        }
        if let Some(lit) = STRING_LITERAL.captures(piece) {
            quote.get_or_insert_with(|| lit["q"].chars().next().unwrap_or('"'));
            query.push_str(&lit["value"]);
        } else {
            query.push('?');
            params.push(unwrap_conversion(piece).to_string());
        }
    }

    let quote = quote?;
    if params.is_empty() {
        return None;
    }

    // Quoted placeholders ('?') become bare placeholders
    let query = query.replace("'?'", "?").replace("\"?\"", "?");

    let bare = variable.trim_start_matches('$');
    let execute = Regex::new(&format!(
        r"\b(?:execute|executeQuery|executeUpdate|query|exec|Exec|Query|QueryRow|prepare|raw)\s*\(\s*\$?{}\s*\)",
        regex::escape(bare)
    ))
    .ok()?;
    let execute_line = lines
        .iter()
        .enumerate()
        .skip(bug_line)
        .take(10)
        .find(|(_, l)| execute.is_match(l))
        .map(|(idx, _)| idx + 1);

    Some(SqlConcatenation {
        variable,
        declaration: caps.name("decl").map(|m| m.as_str().to_string()).unwrap_or_default(),
        operator: caps.name("op").map(|m| m.as_str().to_string()).unwrap_or_else(|| "=".to_string()),
        semicolon: caps.name("semi").is_some_and(|m| !m.as_str().is_empty()),
        query,
        quote,
        params,
        line: bug_line,
        execute_line,
    })
}

/// `str(x)`, `String(x)` and `strconv.Itoa(x)` collapse to `x`.
fn unwrap_conversion(expr: &str) -> &str {
    for prefix in ["str(", "String(", "strconv.Itoa(", "toString(", "strval("] {
        if let Some(inner) = expr.strip_prefix(prefix).and_then(|r| r.strip_suffix(')')) {
            return inner.trim();
        }
    }
    expr
}

fn split_outside_strings(text: &str, sep: char) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_string: Option<char> = None;
    let mut depth = 0usize;
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        if let Some(q) = in_string {
            current.push(ch);
            if ch == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if ch == q {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                in_string = Some(ch);
                current.push(ch);
            }
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c == sep && depth == 0 => pieces.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    pieces.push(current);
    pieces
}

/// A string literal assigned to a credential-like identifier.
pub fn credential_assignment(line_text: &str, line: usize) -> Option<CredentialAssignment> {
    let caps = ASSIGNMENT.captures(line_text)?;
    let variable = caps.name("var")?.as_str();
    if !CREDENTIAL_NAME.is_match(variable) {
        return None;
    }
    let literal = STRING_LITERAL.captures(caps.name("rhs")?.as_str())?;
    Some(CredentialAssignment {
        variable: variable.to_string(),
        declaration: caps.name("decl").map(|m| m.as_str().to_string()).unwrap_or_default(),
        value: literal["value"].to_string(),
        line,
        semicolon: caps.name("semi").is_some_and(|m| !m.as_str().is_empty()),
    })
}

/// `apiKey`, `self.api_key` and `$db_password` become `API_KEY` / `DB_PASSWORD`.
pub fn env_key(variable: &str) -> String {
    let name = variable.rsplit('.').next().unwrap_or(variable);
    let name = name.trim_start_matches('$');
    let mut key = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() && prev_lower {
            key.push('_');
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        key.push(ch.to_ascii_uppercase());
    }
    key
}

/// Locate the except/catch/rescue handler at or just around `bug_line`.
pub fn swallowed_handler(
    lines: &[&str],
    bug_line: usize,
    language: Language,
) -> Option<SwallowedHandler> {
    let first = bug_line.saturating_sub(5).max(1);
    let last = (bug_line + 2).min(lines.len());
    let mut candidates: Vec<usize> = (first..=bug_line.min(last)).rev().collect();
    candidates.extend(bug_line + 1..=last);

    for n in candidates {
        let text = lines.get(n - 1)?;
        let found = match language {
            Language::Python => indented_handler(lines, n, &PY_EXCEPT),
            Language::Ruby => indented_handler(lines, n, &RUBY_RESCUE),
            Language::Go | Language::Unknown => None,
            _ => brace_handler(lines, n, text),
        };
        if let Some(handler) = found {
            if handler.end_line >= bug_line || n == bug_line {
                return Some(handler);
            }
        }
    }
    None
}

fn indented_handler(lines: &[&str], n: usize, pattern: &Regex) -> Option<SwallowedHandler> {
    let text = lines[n - 1];
    let caps = pattern.captures(text)?;
    let base = indent_width(text);
    let mut end_line = n;
    for (idx, line) in lines.iter().enumerate().skip(n) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if indent_width(line) <= base {
            break;
        }
        end_line = idx + 1;
    }
    Some(SwallowedHandler {
        handler_line: n,
        end_line,
        exception_type: caps.name("ty").map(|m| m.as_str().to_string()),
        exception_var: caps.name("var").map(|m| m.as_str().to_string()),
        head: leading_whitespace(text).to_string(),
        closing: String::new(),
    })
}

fn brace_handler(lines: &[&str], n: usize, text: &str) -> Option<SwallowedHandler> {
    let caps = BRACE_CATCH.captures(text)?;
    let whole = caps.get(0)?;
    let head = text[..whole.end()].to_string();

    let mut depth = 1usize;
    let mut start = whole.end();
    for (idx, line) in lines.iter().enumerate().skip(n - 1) {
        let segment = if idx == n - 1 { &line[start..] } else { *line };
        for (offset, ch) in segment.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let col = if idx == n - 1 { start + offset } else { offset };
                        return Some(SwallowedHandler {
                            handler_line: n,
                            end_line: idx + 1,
                            exception_type: caps.name("ty").map(|m| m.as_str().trim().to_string()),
                            exception_var: caps.name("var").map(|m| m.as_str().to_string()),
                            head,
                            closing: line[col..].to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        start = 0;
    }
    None
}

/// Blank out string literal contents so identifiers inside them are ignored.
fn strip_strings(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    for ch in line.chars() {
        match in_string {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    in_string = None;
                    out.push(ch);
                    continue;
                }
                out.push(' ');
            }
            None => {
                if ch == '"' || ch == '\'' || ch == '`' {
                    in_string = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_deref_skips_keywords() {
        assert_eq!(null_deref("    return d.get('k')", 2).unwrap().variable, "d");
        assert_eq!(null_deref("if (user.name) {", 1).unwrap().variable, "user");
        assert_eq!(null_deref("x = items[0]", 1).unwrap().variable, "items");
        assert!(null_deref("print 'a.b'", 1).is_none());
        assert!(null_deref("x = 1", 1).is_none());
        assert_eq!(
            null_deref("        value = self.cache.get(key)", 5).unwrap().variable,
            "self.cache"
        );
        assert_eq!(null_deref("$this->db->query($q);", 1).unwrap().variable, "$this->db");
    }

    #[test]
    fn test_resource_acquisition_span() {
        let lines = vec![
            "def read():",
            "    f = open('x', 'r')",
            "    data = f.read()",
            "    f.close()",
            "    return data",
        ];
        let acq = resource_acquisition(&lines, 2).unwrap();
        assert_eq!(acq.variable, "f");
        assert_eq!(acq.expression, "open('x', 'r')");
        assert_eq!(acq.last_use_line, 4);
        assert_eq!(acq.close_lines, vec![4]);
    }

    #[test]
    fn test_resource_acquisition_with_declared_type() {
        let lines = vec!["    FileInputStream in = new FileInputStream(path);", "    in.read();"];
        let acq = resource_acquisition(&lines, 2).unwrap();
        assert_eq!(acq.line, 1);
        assert_eq!(acq.variable, "in");
        assert_eq!(acq.declaration, "FileInputStream ");
        assert_eq!(acq.expression, "new FileInputStream(path)");
    }

    #[test]
    fn test_sql_concatenation() {
        let lines = vec![
            "    query = \"SELECT * FROM users WHERE id = '\" + user_id + \"' AND org = \" + str(org)",
            "    cursor.execute(query)",
        ];
        let sql = sql_concatenation(&lines, 1, Language::Python).unwrap();
        assert_eq!(sql.variable, "query");
        assert_eq!(sql.query, "SELECT * FROM users WHERE id = ? AND org = ?");
        assert_eq!(sql.params, vec!["user_id", "org"]);
        assert_eq!(sql.execute_line, Some(2));
    }

    #[test]
    fn test_sql_without_parameters_is_not_a_match() {
        let lines = vec!["q = \"SELECT 1\""];
        assert!(sql_concatenation(&lines, 1, Language::Python).is_none());
    }

    #[test]
    fn test_credential_assignment() {
        let cred = credential_assignment("API_KEY = \"sk-123\"", 1).unwrap();
        assert_eq!(cred.value, "sk-123");
        assert_eq!(cred.env_key(), "API_KEY");

        let java = credential_assignment("    private String dbPassword = \"hunter2\";", 4).unwrap();
        assert_eq!(java.variable, "dbPassword");
        assert_eq!(java.declaration, "private String ");
        assert!(java.semicolon);
        assert_eq!(java.env_key(), "DB_PASSWORD");

        assert!(credential_assignment("name = \"bob\"", 1).is_none());
        assert!(credential_assignment("token = get_token()", 1).is_none());
    }

    #[test]
    fn test_python_except_span() {
        let lines = vec![
            "try:",
            "    risky()",
            "except Exception as e:",
            "    pass",
            "",
            "done()",
        ];
        let handler = swallowed_handler(&lines, 4, Language::Python).unwrap();
        assert_eq!((handler.handler_line, handler.end_line), (3, 4));
        assert_eq!(handler.exception_type.as_deref(), Some("Exception"));
        assert_eq!(handler.exception_var.as_deref(), Some("e"));
    }

    #[test]
    fn test_brace_catch_span() {
        let lines = vec![
            "try {",
            "    risky();",
            "} catch (IOException e) {",
            "    // ignore",
            "}",
        ];
        let handler = swallowed_handler(&lines, 3, Language::Java).unwrap();
        assert_eq!((handler.handler_line, handler.end_line), (3, 5));
        assert_eq!(handler.head, "} catch (IOException e) {");
        assert_eq!(handler.exception_type.as_deref(), Some("IOException"));
        assert_eq!(handler.exception_var.as_deref(), Some("e"));
        assert_eq!(handler.closing, "}");
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("self.api_key"), "API_KEY");
        assert_eq!(env_key("$db_password"), "DB_PASSWORD");
        assert_eq!(env_key("secretToken"), "SECRET_TOKEN");
    }
}
