//! Tree-sitter based parsing and syntax checks.
//!
//! Python, JavaScript, TypeScript and Go are parsed with bundled grammars.
//! The remaining brace languages get a delimiter-balance check, which is
//! enough to catch a template that dropped or duplicated a block.

use crate::analyzer::{AstInfo, Assignment, CallSite, Definition, DefinitionKind, Import};
use crate::language::Language;
use std::cell::RefCell;
use std::path::Path;
use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no parser available for {0}")]
    NoParser(Language),
    #[error("failed to parse {0} source")]
    Failed(Language),
    #[error("syntax error at line {line}")]
    Syntax { line: usize },
}

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Parsers are reused per thread; folder analysis runs on rayon workers and
// each worker keeps its own configured set.

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A language that fails to load surfaces as a parse failure later
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });

    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });

    static GO_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_go::LANGUAGE.into());
        p
    });
}

/// Parse content using a thread-local parser for the given language.
pub fn parse_tree(
    content: &str,
    language: Language,
    path: Option<&Path>,
) -> Result<Tree, ParseError> {
    let parsed = match language {
        Language::Python => PYTHON_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::JavaScript => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        Language::TypeScript => {
            let use_tsx = path
                .and_then(|p| p.extension())
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("tsx"))
                .unwrap_or(false);
            if use_tsx {
                TSX_PARSER.with(|p| p.borrow_mut().parse(content, None))
            } else {
                TS_PARSER.with(|p| p.borrow_mut().parse(content, None))
            }
        }
        Language::Go => GO_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        other => return Err(ParseError::NoParser(other)),
    };

    parsed.ok_or(ParseError::Failed(language))
}

/// Parse and reject trees that contain error or missing nodes.
pub fn parse_clean(
    content: &str,
    language: Language,
    path: Option<&Path>,
) -> Result<Tree, ParseError> {
    let tree = parse_tree(content, language, path)?;
    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(&root).unwrap_or(1);
        return Err(ParseError::Syntax { line });
    }
    Ok(tree)
}

/// Check that `content` is syntactically valid for `language`.
///
/// Returns a human-readable reason on failure. Languages without a grammar
/// or delimiter rules are accepted.
pub fn check_syntax(content: &str, language: Language, path: Option<&Path>) -> Result<(), String> {
    if language.has_parser() {
        return parse_clean(content, language, path)
            .map(|_| ())
            .map_err(|e| e.to_string());
    }
    match language {
        Language::Java | Language::C | Language::Cpp | Language::CSharp | Language::Php => {
            check_delimiters(content, language)
        }
        _ => Ok(()),
    }
}

fn first_error_line(node: &Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() || child.is_missing() {
            if let Some(line) = first_error_line(&child) {
                return Some(line);
            }
        }
    }
    None
}

/// Balance `()[]{}` while skipping string literals and comments.
fn check_delimiters(content: &str, language: Language) -> Result<(), String> {
    let hash_comments = language == Language::Php;
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut chars = content.chars().peekable();
    let mut in_string: Option<char> = None;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            line += 1;
        }
        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }
        if let Some(quote) = in_string {
            if ch == '\\' {
                if chars.next() == Some('\n') {
                    line += 1;
                }
            } else if ch == quote || ch == '\n' {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => in_string = Some(ch),
            '/' if chars.peek() == Some(&'/') => skip_to_eol(&mut chars, &mut line),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block_comment = true;
            }
            '#' if hash_comments => skip_to_eol(&mut chars, &mut line),
            '(' | '[' | '{' => stack.push((ch, line)),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "mismatched '{}' at line {} (opened '{}' at line {})",
                            ch, line, open, open_line
                        ));
                    }
                    None => return Err(format!("unbalanced '{}' at line {}", ch, line)),
                }
            }
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, open_line)) => Err(format!("unclosed '{}' opened at line {}", open, open_line)),
        None => Ok(()),
    }
}

fn skip_to_eol(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, line: &mut usize) {
    for c in chars.by_ref() {
        if c == '\n' {
            *line += 1;
            break;
        }
    }
}

/// Collect definitions, assignments, call sites and imports from a tree.
pub fn extract_structure(tree: &Tree, content: &str, language: Language) -> AstInfo {
    let mut info = AstInfo::default();
    let root = tree.root_node();
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();
        match language {
            Language::Python => visit_python(&node, content, &mut info),
            Language::JavaScript | Language::TypeScript => visit_js(&node, content, &mut info),
            Language::Go => visit_go(&node, content, &mut info),
            _ => return info,
        }

        if cursor.goto_first_child() {
            continue;
        }

        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return info;
            }
        }
    }
}

fn visit_python(node: &Node, content: &str, info: &mut AstInfo) {
    match node.kind() {
        "function_definition" => {
            if let Some(def) = definition(node, content, DefinitionKind::Function) {
                info.functions.push(def);
            }
        }
        "class_definition" => {
            if let Some(def) = definition(node, content, DefinitionKind::Class) {
                info.classes.push(def);
            }
        }
        "assignment" | "augmented_assignment" => {
            if let Some(left) = node.child_by_field_name("left") {
                info.assignments.push(Assignment {
                    target: get_node_text(&left, content),
                    line: line_of(node),
                });
            }
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function") {
                info.calls.push(CallSite {
                    callee: get_node_text(&function, content),
                    line: line_of(node),
                });
            }
        }
        "import_statement" | "import_from_statement" => info.imports.push(Import {
            text: get_node_text(node, content).trim().to_string(),
            line: line_of(node),
        }),
        _ => {}
    }
}

fn visit_js(node: &Node, content: &str, info: &mut AstInfo) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" | "function_expression" => {
            if let Some(def) = definition(node, content, DefinitionKind::Function) {
                info.functions.push(def);
            }
        }
        "method_definition" => {
            if let Some(def) = definition(node, content, DefinitionKind::Method) {
                info.functions.push(def);
            }
        }
        "arrow_function" => {
            // Arrow functions assigned to variables
            if let Some(parent) = node.parent() {
                if parent.kind() == "variable_declarator" {
                    if let Some(name_node) = parent.child_by_field_name("name") {
                        info.functions.push(Definition {
                            name: get_node_text(&name_node, content),
                            kind: DefinitionKind::Function,
                            start_line: line_of(node),
                            end_line: node.end_position().row + 1,
                        });
                    }
                }
            }
        }
        "class_declaration" | "class" | "interface_declaration" => {
            if let Some(def) = definition(node, content, DefinitionKind::Class) {
                info.classes.push(def);
            }
        }
        "variable_declarator" => {
            if let Some(name) = node.child_by_field_name("name") {
                info.assignments.push(Assignment {
                    target: get_node_text(&name, content),
                    line: line_of(node),
                });
            }
        }
        "assignment_expression" => {
            if let Some(left) = node.child_by_field_name("left") {
                info.assignments.push(Assignment {
                    target: get_node_text(&left, content),
                    line: line_of(node),
                });
            }
        }
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                info.calls.push(CallSite {
                    callee: get_node_text(&function, content),
                    line: line_of(node),
                });
            }
        }
        "import_statement" => info.imports.push(Import {
            text: get_node_text(node, content).trim().to_string(),
            line: line_of(node),
        }),
        _ => {}
    }
}

fn visit_go(node: &Node, content: &str, info: &mut AstInfo) {
    match node.kind() {
        "function_declaration" => {
            if let Some(def) = definition(node, content, DefinitionKind::Function) {
                info.functions.push(def);
            }
        }
        "method_declaration" => {
            if let Some(def) = definition(node, content, DefinitionKind::Method) {
                info.functions.push(def);
            }
        }
        "type_spec" => {
            if let Some(def) = definition(node, content, DefinitionKind::Class) {
                info.classes.push(def);
            }
        }
        "short_var_declaration" | "assignment_statement" => {
            if let Some(left) = node.child_by_field_name("left") {
                info.assignments.push(Assignment {
                    target: get_node_text(&left, content),
                    line: line_of(node),
                });
            }
        }
        "var_spec" | "const_spec" => {
            if let Some(name) = node.child_by_field_name("name") {
                info.assignments.push(Assignment {
                    target: get_node_text(&name, content),
                    line: line_of(node),
                });
            }
        }
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                info.calls.push(CallSite {
                    callee: get_node_text(&function, content),
                    line: line_of(node),
                });
            }
        }
        "import_spec" => info.imports.push(Import {
            text: get_node_text(node, content).trim().to_string(),
            line: line_of(node),
        }),
        _ => {}
    }
}

fn definition(node: &Node, content: &str, kind: DefinitionKind) -> Option<Definition> {
    let name_node = node.child_by_field_name("name")?;
    Some(Definition {
        name: get_node_text(&name_node, content),
        kind,
        start_line: line_of(node),
        end_line: node.end_position().row + 1,
    })
}

fn line_of(node: &Node) -> usize {
    node.start_position().row + 1
}

fn get_node_text(node: &Node, content: &str) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    content.get(start..end).unwrap_or_default().to_string()
}
