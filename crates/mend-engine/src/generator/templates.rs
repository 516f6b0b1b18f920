//! One fix template per bug kind.
//!
//! Templates turn the analyzer's signals into line changes against the
//! original file. They never guess: a missing signal is a
//! `PatternNotFound` error and the generator returns an empty
//! implementation.

use mend_core::analyzer::heuristic::{block_end, leading_whitespace};
use mend_core::analyzer::signals::{
    BugSignals, NullDeref, ResourceAcquisition, SqlConcatenation, SwallowedHandler,
};
use mend_core::analyzer::Analysis;
use mend_core::{BugKind, Change, InputError, Language, Strategy};
use regex::{NoExpand, Regex};

/// Everything a template may look at.
pub struct TemplateInput<'a> {
    pub strategy: &'a Strategy,
    pub analysis: &'a Analysis,
    pub lines: Vec<&'a str>,
}

impl TemplateInput<'_> {
    fn language(&self) -> Language {
        self.analysis.language
    }

    fn unit(&self) -> &str {
        &self.analysis.indent_unit
    }

    fn line(&self, n: usize) -> &str {
        self.lines.get(n.wrapping_sub(1)).copied().unwrap_or("")
    }

    fn in_function(&self) -> bool {
        self.analysis
            .containing_function
            .as_ref()
            .is_some_and(|d| !d.is_class())
    }

    fn not_found(&self, reason: impl Into<String>) -> InputError {
        InputError::PatternNotFound {
            bug_type: self.analysis.bug_type.to_string(),
            reason: reason.into(),
        }
    }
}

/// Changes plus the human-readable summary of a fix.
#[derive(Debug, Clone)]
pub struct Fix {
    pub changes: Vec<Change>,
    pub description: String,
    pub approach: String,
}

pub type TemplateFn = fn(&TemplateInput<'_>) -> Result<Fix, InputError>;

/// Template table indexed by bug kind.
pub fn template_for(kind: BugKind) -> TemplateFn {
    match kind {
        BugKind::NullPointer => null_pointer,
        BugKind::ResourceLeak => resource_leak,
        BugKind::SqlInjection => sql_injection,
        BugKind::HardcodedCredentials => hardcoded_credentials,
        BugKind::ExceptionSwallowing => exception_swallowing,
        BugKind::Generic => generic,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  NULL POINTER
// ═══════════════════════════════════════════════════════════════════════════

fn null_pointer(input: &TemplateInput<'_>) -> Result<Fix, InputError> {
    let Some(BugSignals::NullDeref(NullDeref { variable, line })) = &input.analysis.signals else {
        return Err(input.not_found("no dereferenced variable on the bug line"));
    };
    let text = input.line(*line);
    let statement = text.trim();
    if statement.ends_with(':') || statement.ends_with('{') {
        return Err(input.not_found("bug line opens a block"));
    }

    let indent = leading_whitespace(text);
    let unit = input.unit();
    let language = input.language();
    let null = language.null_literal();
    let content = match language {
        Language::Python => {
            let fallback = if input.in_function() { "return None" } else { "pass" };
            format!(
                "{indent}if {variable} is not None:\n{indent}{unit}{statement}\n{indent}else:\n{indent}{unit}{fallback}"
            )
        }
        Language::Ruby => {
            let fallback = if input.in_function() { "return nil" } else { "nil" };
            format!(
                "{indent}if !{variable}.nil?\n{indent}{unit}{statement}\n{indent}else\n{indent}{unit}{fallback}\n{indent}end"
            )
        }
        _ => {
            let (condition, fallback) = if language == Language::Go {
                (format!("{variable} != nil"), "return nil".to_string())
            } else {
                (format!("({variable} != {null})"), format!("return {null};"))
            };
            let mut guard = format!("{indent}if {condition} {{\n{indent}{unit}{statement}\n{indent}}}");
            if input.in_function() {
                guard.push_str(&format!(" else {{\n{indent}{unit}{fallback}\n{indent}}}"));
            }
            guard
        }
    };

    Ok(Fix {
        changes: vec![Change::replace(*line, *line, content)],
        description: format!("Guard `{}` against {} before it is dereferenced", variable, null),
        approach: "null guard with default return".to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESOURCE LEAK
// ═══════════════════════════════════════════════════════════════════════════

fn resource_leak(input: &TemplateInput<'_>) -> Result<Fix, InputError> {
    let Some(BugSignals::ResourceLeak(acq)) = &input.analysis.signals else {
        return Err(input.not_found("no resource acquisition near the bug line"));
    };
    let language = input.language();
    match language {
        Language::Go => return go_defer_close(input, acq),
        Language::C | Language::Cpp => return explicit_release(input, acq),
        _ => {}
    }

    let indent = leading_whitespace(input.line(acq.line)).to_string();
    let unit = input.unit();
    let var = &acq.variable;
    let expr = &acq.expression;

    let body: Vec<String> = (acq.line + 1..=acq.last_use_line)
        .filter(|n| !acq.close_lines.contains(n))
        .map(|n| indent_line(input.line(n), unit))
        .collect();
    let body_or = |empty: &str| -> String {
        if body.iter().all(|l| l.trim().is_empty()) {
            format!("{indent}{unit}{empty}")
        } else {
            body.join("\n")
        }
    };

    let (content, approach) = match language {
        Language::Python => (
            format!("{indent}with {expr} as {var}:\n{}", body_or("pass")),
            "context manager",
        ),
        Language::Ruby => (
            format!("{indent}{expr} do |{var}|\n{}\n{indent}end", body_or("nil")),
            "block form",
        ),
        Language::Java => {
            let decl = declaration_or(&acq.declaration, "var ");
            (
                format!("{indent}try ({decl}{var} = {expr}) {{\n{}\n{indent}}}", body_or("")),
                "try-with-resources",
            )
        }
        Language::CSharp => {
            let decl = declaration_or(&acq.declaration, "var ");
            (
                format!("{indent}using ({decl}{var} = {expr}) {{\n{}\n{indent}}}", body_or("")),
                "using block",
            )
        }
        _ => {
            let close = close_call(language, var, expr);
            (
                format!(
                    "{}\n{indent}try {{\n{}\n{indent}}} finally {{\n{indent}{unit}{close}\n{indent}}}",
                    input.line(acq.line),
                    body_or("")
                ),
                "try/finally",
            )
        }
    };

    Ok(Fix {
        changes: vec![Change::replace(acq.line, acq.last_use_line, content)],
        description: format!("Release `{}` on every path out of its scope", var),
        approach: approach.to_string(),
    })
}

fn go_defer_close(input: &TemplateInput<'_>, acq: &ResourceAcquisition) -> Result<Fix, InputError> {
    let indent = leading_whitespace(input.line(acq.line));
    // `defer` goes after the error check that guards the acquisition
    let after = acq.line + 1;
    let insert_at = if input.line(after).trim_start().starts_with("if err != nil") {
        block_end(&input.lines, after - 1) + 1
    } else {
        after
    };

    let mut changes = vec![Change::insert(
        insert_at,
        format!("{indent}defer {}.Close()", acq.variable),
    )];
    changes.extend(acq.close_lines.iter().map(|&n| Change::delete(n, n)));

    Ok(Fix {
        changes,
        description: format!("Close `{}` with defer once it is acquired", acq.variable),
        approach: "defer close".to_string(),
    })
}

fn explicit_release(
    input: &TemplateInput<'_>,
    acq: &ResourceAcquisition,
) -> Result<Fix, InputError> {
    if !acq.close_lines.is_empty() {
        return Err(input.not_found("resource is already released"));
    }
    let indent = leading_whitespace(input.line(acq.line));
    let release = close_call(input.language(), &acq.variable, &acq.expression);
    Ok(Fix {
        changes: vec![Change::insert(
            acq.last_use_line + 1,
            format!("{indent}{release}"),
        )],
        description: format!("Release `{}` after its last use", acq.variable),
        approach: "explicit release".to_string(),
    })
}

fn close_call(language: Language, var: &str, expr: &str) -> String {
    match language {
        Language::Php => format!("fclose({var});"),
        Language::C => format!("fclose({var});"),
        Language::Cpp if expr.contains("fopen") => format!("fclose({var});"),
        Language::JavaScript | Language::TypeScript if expr.contains("openSync") => {
            format!("fs.closeSync({var});")
        }
        _ => format!("{var}.close();"),
    }
}

fn declaration_or<'a>(declaration: &'a str, fallback: &'a str) -> &'a str {
    if declaration.trim().is_empty() {
        fallback
    } else {
        declaration
    }
}

fn indent_line(line: &str, unit: &str) -> String {
    if line.trim().is_empty() {
        String::new()
    } else {
        format!("{unit}{line}")
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  SQL INJECTION
// ═══════════════════════════════════════════════════════════════════════════

fn sql_injection(input: &TemplateInput<'_>) -> Result<Fix, InputError> {
    let Some(BugSignals::SqlInjection(sql)) = &input.analysis.signals else {
        return Err(input.not_found("no concatenated query on the bug line"));
    };
    let language = input.language();
    let indent = leading_whitespace(input.line(sql.line));
    let params_name = params_name(language);
    let semi = if sql.semicolon || language.needs_semicolon() { ";" } else { "" };
    let quote = sql.quote;
    let query = escape_quote(&sql.query, quote);

    let query_line = format!(
        "{indent}{}{} {} {quote}{query}{quote}{semi}",
        sql.declaration, sql.variable, sql.operator
    );
    let params_line = format!("{indent}{}", params_declaration(language, params_name, &sql.params));

    let mut changes = vec![Change::replace(
        sql.line,
        sql.line,
        format!("{query_line}\n{params_line}"),
    )];
    if let Some(exec_line) = sql.execute_line {
        if let Some(rewritten) = pass_params(input.line(exec_line), sql, language, params_name) {
            changes.push(Change::replace(exec_line, exec_line, rewritten));
        }
    }

    Ok(Fix {
        changes,
        description: format!(
            "Bind {} value(s) as query parameters instead of concatenating them into `{}`",
            sql.params.len(),
            sql.variable
        ),
        approach: "parameterized query".to_string(),
    })
}

fn params_name(language: Language) -> &'static str {
    match language {
        Language::Python | Language::Ruby | Language::JavaScript | Language::TypeScript => "params",
        Language::Php => "$params",
        _ => "queryParams",
    }
}

fn params_declaration(language: Language, name: &str, params: &[String]) -> String {
    let list = params.join(", ");
    match language {
        Language::Python if params.len() == 1 => format!("{name} = ({list},)"),
        Language::Python => format!("{name} = ({list})"),
        Language::Ruby => format!("{name} = [{list}]"),
        Language::JavaScript | Language::TypeScript => format!("const {name} = [{list}];"),
        Language::Php => format!("{name} = [{list}];"),
        Language::Java => format!("Object[] {name} = new Object[] {{{list}}};"),
        Language::CSharp => format!("var {name} = new object[] {{ {list} }};"),
        Language::Go => format!("{name} := []interface{{}}{{{list}}}"),
        Language::C | Language::Cpp => format!("const char *{name}[] = {{{list}}};"),
        Language::Unknown => format!("{name} = [{list}]"),
    }
}

fn pass_params(
    line: &str,
    sql: &SqlConcatenation,
    language: Language,
    params_name: &str,
) -> Option<String> {
    let bare = sql.variable.trim_start_matches('$');
    let call = Regex::new(&format!(
        r"(\b(?:execute|executeQuery|executeUpdate|query|exec|Exec|Query|QueryRow|prepare|raw)\s*\(\s*\$?{})\s*\)",
        regex::escape(bare)
    ))
    .ok()?;
    let spread = if language == Language::Go { "..." } else { "" };
    let replacement = format!("${{1}}, {params_name}{spread})");
    Some(call.replace(line, replacement.as_str()).into_owned())
}

fn escape_quote(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut escaped = false;
    for ch in text.chars() {
        if ch == quote && !escaped {
            out.push('\\');
        }
        escaped = ch == '\\' && !escaped;
        out.push(ch);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
//  HARDCODED CREDENTIALS
// ═══════════════════════════════════════════════════════════════════════════

fn hardcoded_credentials(input: &TemplateInput<'_>) -> Result<Fix, InputError> {
    let Some(BugSignals::HardcodedCredential(cred)) = &input.analysis.signals else {
        return Err(input.not_found("no credential literal on the bug line"));
    };
    let language = input.language();
    let key = cred.env_key();
    let text = input.line(cred.line);
    let indent = leading_whitespace(text);
    let comment = format!(
        "{} Set the {} environment variable",
        language.line_comment(),
        key
    );

    let lookup = env_lookup(language, &key);
    let declaration = if language == Language::Go {
        cred.declaration.replacen("const ", "var ", 1)
    } else {
        cred.declaration.clone()
    };
    let operator = if text.contains(":=") { ":=" } else { "=" };
    let semi = if cred.semicolon || language.needs_semicolon() { ";" } else { "" };
    let line = format!(
        "{indent}{declaration}{} {operator} {lookup}{semi}  {comment}",
        cred.variable
    );

    let mut changes = Vec::new();
    if let Some(import) = env_import(input) {
        changes.push(import);
    }
    changes.push(Change::replace(cred.line, cred.line, line));

    Ok(Fix {
        changes,
        description: format!(
            "Read `{}` from the {} environment variable instead of the source",
            cred.variable, key
        ),
        approach: "environment lookup".to_string(),
    })
}

fn env_lookup(language: Language, key: &str) -> String {
    match language {
        Language::Python => format!("os.environ.get(\"{key}\")"),
        Language::Java => format!("System.getenv(\"{key}\")"),
        Language::JavaScript | Language::TypeScript => format!("process.env.{key}"),
        Language::Go => format!("os.Getenv(\"{key}\")"),
        Language::Ruby => format!("ENV[\"{key}\"]"),
        Language::Php => format!("getenv('{key}')"),
        Language::CSharp => format!("Environment.GetEnvironmentVariable(\"{key}\")"),
        Language::C | Language::Cpp => format!("getenv(\"{key}\")"),
        Language::Unknown => format!("getenv(\"{key}\")"),
    }
}

fn env_import(input: &TemplateInput<'_>) -> Option<Change> {
    match input.language() {
        Language::Python => python_import(input, "os"),
        Language::Go => go_import(input, "os"),
        Language::CSharp => header_line(input, "using System;"),
        Language::C => header_line(input, "#include <stdlib.h>"),
        Language::Cpp => header_line(input, "#include <cstdlib>"),
        _ => None,
    }
}

/// `import <module>` before the first import, unless already imported.
///
/// Never lands above the module docstring or a `from __future__` import,
/// both of which must stay at the top of the module.
fn python_import(input: &TemplateInput<'_>, module: &str) -> Option<Change> {
    let imported = Regex::new(&format!(
        r"^\s*import\s+(?:[\w.]+\s*,\s*)*{}\b",
        regex::escape(module)
    ))
    .ok()?;
    if input.lines.iter().any(|l| imported.is_match(l)) {
        return None;
    }
    let floor = python_header_end(&input.lines);
    let at = first_import_line(&input.lines, floor).unwrap_or(floor + 1);
    Some(Change::insert(at, format!("import {module}")))
}

/// 1-based line of the first top-level import at or after index `from`.
fn first_import_line(lines: &[&str], from: usize) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, l)| {
            let t = l.trim_start();
            l.len() == t.len() && (t.starts_with("import ") || t.starts_with("from "))
        })
        .map(|(idx, _)| idx + 1)
}

/// Number of leading lines nothing may be inserted above: shebang and
/// encoding comments, the module docstring, and `from __future__` imports.
fn python_header_end(lines: &[&str]) -> usize {
    let mut end = lines
        .iter()
        .take_while(|l| l.starts_with("#!") || l.starts_with("# -*-") || l.starts_with("# coding"))
        .count();

    let mut idx = end;
    while idx < lines.len() && is_blank_or_comment(lines[idx]) {
        idx += 1;
    }
    if let Some(close) = docstring_end(lines, idx) {
        end = close + 1;
    }

    let mut idx = end;
    while idx < lines.len() {
        if lines[idx].starts_with("from __future__") {
            idx = statement_end(lines, idx);
            end = idx + 1;
        } else if !is_blank_or_comment(lines[idx]) {
            break;
        }
        idx += 1;
    }
    end
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

/// Index of the line closing a docstring that opens on line `idx`.
fn docstring_end(lines: &[&str], idx: usize) -> Option<usize> {
    let body = lines.get(idx)?.trim_start_matches(['r', 'R', 'u', 'U']);
    let quote = ["\"\"\"", "'''"].into_iter().find(|q| body.starts_with(q))?;
    if body[quote.len()..].contains(quote) {
        return Some(idx);
    }
    lines
        .iter()
        .enumerate()
        .skip(idx + 1)
        .find(|(_, l)| l.contains(quote))
        .map(|(close, _)| close)
}

/// Last line of a statement that may continue inside parentheses.
fn statement_end(lines: &[&str], idx: usize) -> usize {
    if !lines[idx].contains('(') || lines[idx].contains(')') {
        return idx;
    }
    lines
        .iter()
        .enumerate()
        .skip(idx + 1)
        .find(|(_, l)| l.contains(')'))
        .map_or(idx, |(close, _)| close)
}

fn go_import(input: &TemplateInput<'_>, package: &str) -> Option<Change> {
    let quoted = format!("\"{package}\"");
    if input.lines.iter().any(|l| {
        let t = l.trim();
        t == quoted || t == format!("import {quoted}") || t.ends_with(&format!(" {quoted}"))
    }) {
        return None;
    }
    if let Some(idx) = input.lines.iter().position(|l| l.trim() == "import (") {
        return Some(Change::insert(idx + 2, format!("\t{quoted}")));
    }
    let at = input
        .lines
        .iter()
        .position(|l| l.trim_start().starts_with("package "))
        .map(|idx| idx + 2)
        .unwrap_or(1);
    Some(Change::insert(at, format!("import {quoted}")))
}

/// A header line (`using`, `#include`, `import`) at the top, unless present.
fn header_line(input: &TemplateInput<'_>, header: &str) -> Option<Change> {
    if input.lines.iter().any(|l| l.trim() == header) {
        return None;
    }
    Some(Change::insert(1, header.to_string()))
}

/// Java imports go after the package declaration, all at one position.
fn java_imports(input: &TemplateInput<'_>, imports: &[&str]) -> Option<Change> {
    let missing: Vec<&str> = imports
        .iter()
        .copied()
        .filter(|imp| !input.lines.iter().any(|l| l.trim() == *imp))
        .collect();
    if missing.is_empty() {
        return None;
    }
    let at = input
        .lines
        .iter()
        .position(|l| l.trim_start().starts_with("package "))
        .map(|idx| idx + 2)
        .unwrap_or(1);
    Some(Change::insert(at, missing.join("\n")))
}

// ═══════════════════════════════════════════════════════════════════════════
//  EXCEPTION SWALLOWING
// ═══════════════════════════════════════════════════════════════════════════

fn exception_swallowing(input: &TemplateInput<'_>) -> Result<Fix, InputError> {
    let Some(BugSignals::ExceptionSwallowing(handler)) = &input.analysis.signals else {
        return Err(input.not_found("no exception handler near the bug line"));
    };
    let language = input.language();
    let text = input.line(handler.handler_line);
    let indent = leading_whitespace(text);
    let unit = input.unit();
    let inner = format!("{indent}{unit}");
    let (head, var) = catch_binding(handler, language);

    let mut changes = Vec::new();
    let content = match language {
        Language::Python => {
            changes.extend(python_import(input, "logging"));
            let ty = handler.exception_type.as_deref().unwrap_or("Exception");
            let mut block = format!(
                "{indent}except {ty} as {var}:\n{inner}logging.exception(\"Unhandled error: %s\", {var})"
            );
            if input.in_function() {
                block.push_str(&format!("\n{inner}return None"));
            }
            block
        }
        Language::Ruby => {
            let ty = handler.exception_type.as_deref().unwrap_or("StandardError");
            let sentinel = if input.in_function() { "return nil" } else { "nil" };
            format!(
                "{indent}rescue {ty} => {var}\n{inner}warn \"Unhandled error: #{{{var}.message}}\"\n{inner}{sentinel}"
            )
        }
        _ => {
            changes.extend(logging_import(input));
            let log = log_statement(language, &var);
            let mut block = format!("{head}\n{inner}{log}");
            if input.in_function() {
                let sentinel = match language {
                    Language::Cpp => "return {};".to_string(),
                    _ => format!("return {};", language.null_literal()),
                };
                block.push_str(&format!("\n{inner}{sentinel}"));
            }
            block.push_str(&format!("\n{indent}{}", handler.closing));
            block
        }
    };

    changes.push(Change::replace(handler.handler_line, handler.end_line, content));

    Ok(Fix {
        changes,
        description: format!(
            "Log the caught {} and return an explicit sentinel instead of ignoring it",
            handler.exception_type.as_deref().unwrap_or("exception")
        ),
        approach: "log and return sentinel".to_string(),
    })
}

fn log_statement(language: Language, var: &str) -> String {
    match language {
        Language::Java => {
            format!("Logger.getGlobal().log(Level.SEVERE, \"Unhandled error\", {var});")
        }
        Language::CSharp => format!("Console.Error.WriteLine($\"Unhandled error: {{{var}}}\");"),
        Language::Php => format!("error_log(\"Unhandled error: \" . ${var}->getMessage());"),
        Language::Cpp => {
            format!("std::cerr << \"Unhandled error: \" << {var}.what() << std::endl;")
        }
        _ => format!("console.error(\"Unhandled error:\", {var});"),
    }
}

fn logging_import(input: &TemplateInput<'_>) -> Option<Change> {
    match input.language() {
        Language::Java => java_imports(
            input,
            &["import java.util.logging.Level;", "import java.util.logging.Logger;"],
        ),
        Language::CSharp => header_line(input, "using System;"),
        Language::Cpp => header_line(input, "#include <iostream>"),
        _ => None,
    }
}

/// The handler's opening line and the name bound to the exception.
///
/// Handlers that bind nothing get a binding added to their head.
fn catch_binding(handler: &SwallowedHandler, language: Language) -> (String, String) {
    let fallback = match language {
        Language::JavaScript | Language::TypeScript => "err",
        _ => "e",
    };
    match handler.exception_var.as_deref() {
        // `catch (IOException) {` names a type and binds nothing
        Some(ty)
            if language == Language::CSharp
                && handler.exception_type.is_none()
                && ty.starts_with(|c: char| c.is_ascii_uppercase()) =>
        {
            let binding = format!("catch ({ty} {fallback})");
            (
                rewrite_head(&handler.head, r"catch\s*\(\s*\w+\s*\)", &binding),
                fallback.to_string(),
            )
        }
        Some(var) => (handler.head.clone(), var.to_string()),
        None => {
            let binding = match language {
                Language::Php => format!("catch (\\Exception ${fallback}) {{"),
                Language::CSharp | Language::Java => format!("catch (Exception {fallback}) {{"),
                _ => format!("catch ({fallback}) {{"),
            };
            (
                rewrite_head(&handler.head, r"catch\s*\{$", &binding),
                fallback.to_string(),
            )
        }
    }
}

fn rewrite_head(head: &str, pattern: &str, replacement: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace(head, NoExpand(replacement)).into_owned(),
        Err(_) => head.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  GENERIC
// ═══════════════════════════════════════════════════════════════════════════

fn generic(input: &TemplateInput<'_>) -> Result<Fix, InputError> {
    let line = input.analysis.bug_line;
    let indent = leading_whitespace(input.line(line));
    let label = if input.strategy.bug_type.trim().is_empty() {
        "unclassified bug"
    } else {
        input.strategy.bug_type.trim()
    };
    let detail = if input.strategy.name.trim().is_empty() {
        String::new()
    } else {
        format!(" ({})", input.strategy.name.trim())
    };
    let comment = format!(
        "{indent}{} FIXME: {label} reported at line {line}{detail}",
        input.language().line_comment()
    );

    Ok(Fix {
        changes: vec![Change::insert(line, comment)],
        description: format!("Mark the {} at line {} for manual review", label, line),
        approach: "annotate for review".to_string(),
    })
}
