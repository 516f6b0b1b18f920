//! PatchGenerator: strategy + file contents → Implementation.
//!
//! Generation never fails outright. Anything that stops a fix from being
//! built (missing file, bad line, no recognizable pattern) produces an empty
//! implementation carrying the reason in `error`.

pub mod templates;

use crate::validator::PatchValidator;
use chrono::{DateTime, Utc};
use mend_core::analyzer::{Analysis, CodeAnalyzer};
use mend_core::{
    BugKind, Implementation, InputError, Language, Patch, RiskLevel, Strategy, ValidationResult,
};
use std::collections::HashMap;
use templates::{template_for, Fix, TemplateInput};
use tracing::{debug, info, warn};

const BASE_CONFIDENCE: f64 = 0.8;
const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;
/// Implementations with more patches than this are considered risky
const MANY_PATCHES: usize = 5;

/// Optional inputs that make generation reproducible or cheaper.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    /// Precomputed analysis of the bug location; recomputed when absent or
    /// when it describes a different file or line
    pub analysis: Option<Analysis>,
    /// Fixed generation time, used in the implementation id
    pub timestamp: Option<DateTime<Utc>>,
}

impl GenerationContext {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            analysis: None,
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Default)]
pub struct PatchGenerator {
    analyzer: CodeAnalyzer,
    validator: PatchValidator,
}

impl PatchGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an implementation for `strategy` from the supplied file texts.
    pub fn generate(
        &self,
        strategy: &Strategy,
        files: &HashMap<String, String>,
        ctx: &GenerationContext,
    ) -> Implementation {
        let generated_at = ctx.timestamp.unwrap_or_else(Utc::now);
        let kind = strategy.kind();
        let mut implementation = Implementation {
            implementation_id: implementation_id(strategy, generated_at),
            strategy_id: strategy.id.clone(),
            bug_type: kind,
            bug_location: strategy.bug_location.clone(),
            bug_line: strategy.bug_line,
            patches: Vec::new(),
            language: Language::from_path(&strategy.bug_location),
            description: String::new(),
            approach: String::new(),
            risk_level: RiskLevel::High,
            confidence_level: MIN_CONFIDENCE,
            validation_result: None,
            generated_at,
            error: None,
        };

        let (fix, function_name) = match self.build(strategy, kind, files, ctx) {
            Ok(built) => built,
            Err(err) => {
                warn!(
                    "no fix generated for strategy {} ({}): {}",
                    strategy.id, kind, err
                );
                implementation.description = format!("No fix generated: {}", err);
                implementation.error = Some(err.to_string());
                return implementation;
            }
        };

        implementation.description = fix.description;
        implementation.approach = fix.approach;
        implementation.patches = vec![
            Patch::new(strategy.bug_location.trim(), fix.changes).with_function(function_name),
        ];

        let validation = self.validator.validate(&implementation, files);
        if !validation.success {
            debug!(
                "generated {} failed validation: {}",
                implementation.implementation_id,
                validation.errors.join("; ")
            );
        }
        implementation.confidence_level =
            confidence(&validation, implementation.patches.len());
        implementation.risk_level = risk(kind, &validation, implementation.patches.len());
        implementation.validation_result = Some(validation);

        info!(
            "generated {} for {}:{} ({}, {} change(s), confidence {:.2})",
            implementation.implementation_id,
            implementation.bug_location,
            implementation.bug_line,
            implementation.approach,
            implementation.total_changes(),
            implementation.confidence_level
        );
        implementation
    }

    fn build(
        &self,
        strategy: &Strategy,
        kind: BugKind,
        files: &HashMap<String, String>,
        ctx: &GenerationContext,
    ) -> Result<(Fix, Option<String>), InputError> {
        let location = strategy.bug_location.trim();
        if location.is_empty() {
            return Err(InputError::InvalidStrategy(format!(
                "strategy {} has no bug location",
                strategy.id
            )));
        }
        let content = files
            .get(location)
            .ok_or_else(|| InputError::FileNotFound(location.to_string()))?;

        let analysis = match &ctx.analysis {
            Some(analysis)
                if analysis.file_path == location
                    && analysis.bug_line == strategy.bug_line
                    && analysis.bug_type == kind =>
            {
                analysis.clone()
            }
            _ => self
                .analyzer
                .analyze(location, content, strategy.bug_line, kind)?,
        };

        debug!("dispatching {} template for {}", kind, location);
        let input = TemplateInput {
            strategy,
            analysis: &analysis,
            lines: content.lines().collect(),
        };
        let fix = template_for(kind)(&input)?;
        let function_name = analysis.containing_function.as_ref().map(|d| d.name.clone());
        Ok((fix, function_name))
    }
}

/// `impl_` + the first 12 hex digits of md5(strategy id, location, time).
pub fn implementation_id(strategy: &Strategy, generated_at: DateTime<Utc>) -> String {
    let seed = format!(
        "{}:{}:{}",
        strategy.id,
        strategy.bug_location,
        generated_at.to_rfc3339()
    );
    let digest = format!("{:x}", md5::compute(seed.as_bytes()));
    format!("impl_{}", &digest[..12])
}

fn confidence(validation: &ValidationResult, patch_count: usize) -> f64 {
    let mut score = BASE_CONFIDENCE;
    score += if validation.success { 0.1 } else { -0.3 };
    if patch_count > MANY_PATCHES {
        score -= 0.1;
    }
    score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

fn risk(kind: BugKind, validation: &ValidationResult, patch_count: usize) -> RiskLevel {
    if !validation.success || patch_count > MANY_PATCHES {
        return RiskLevel::High;
    }
    match kind {
        BugKind::NullPointer | BugKind::ExceptionSwallowing | BugKind::Generic => RiskLevel::Low,
        BugKind::ResourceLeak | BugKind::SqlInjection | BugKind::HardcodedCredentials => {
            RiskLevel::Medium
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mend_core::transform::apply_changes;

    fn strategy(bug_type: &str, location: &str, line: usize) -> Strategy {
        Strategy {
            id: "strat_1".into(),
            name: "fix it".into(),
            bug_type: bug_type.into(),
            bug_location: location.into(),
            bug_line: line,
            bug_code: String::new(),
            confidence: 0.7,
            affected_files: vec![location.into()],
        }
    }

    fn files(path: &str, content: &str) -> HashMap<String, String> {
        HashMap::from([(path.to_string(), content.to_string())])
    }

    fn fixed_ctx() -> GenerationContext {
        GenerationContext::at(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
    }

    /// Generate and return the patched file text.
    fn patched(bug_type: &str, path: &str, line: usize, content: &str) -> (Implementation, String) {
        let imp = PatchGenerator::new().generate(
            &strategy(bug_type, path, line),
            &files(path, content),
            &fixed_ctx(),
        );
        assert!(imp.error.is_none(), "unexpected error: {:?}", imp.error);
        let text = apply_changes(content, &imp.patches[0].changes).unwrap();
        (imp, text)
    }

    #[test]
    fn test_null_guard_python() {
        let src = "def get_name(user):\n    name = user.name\n    return name\n";
        let (imp, text) = patched("null_pointer", "app.py", 2, src);

        assert_eq!(
            text,
            "def get_name(user):\n    if user is not None:\n        name = user.name\n    else:\n        return None\n    return name\n"
        );
        assert_eq!(imp.patches[0].function_name.as_deref(), Some("get_name"));
        assert_eq!(imp.risk_level, RiskLevel::Low);
        assert!(imp.validation_result.as_ref().unwrap().success);
        assert!((imp.confidence_level - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_null_guard_on_return_statement() {
        let src = "def f(d):\n    return d.get('k')";
        let mut s = strategy("null_pointer", "f.py", 2);
        s.bug_code = "return d.get('k')".into();
        let imp = PatchGenerator::new().generate(&s, &files("f.py", src), &fixed_ctx());

        let content = &imp.patches[0].changes[0].content;
        assert!(content.contains("is not None"));
        assert!(content.contains("else:"));
        let text = apply_changes(src, &imp.patches[0].changes).unwrap();
        assert!(mend_core::parser::check_syntax(&text, Language::Python, None).is_ok());
    }

    #[test]
    fn test_resource_leak_drops_bare_assignment() {
        let src = "f = open('x','r')\ndata = f.read()\nreturn data";
        let (_, text) = patched("resource_leak", "leak.py", 1, src);
        assert!(text.contains("with open('x','r') as f:"));
        assert!(!text.contains("f = open("));
    }

    #[test]
    fn test_null_guard_javascript() {
        let src = "function total(order) {\n  const n = order.items.length;\n  return n;\n}\n";
        let (_, text) = patched("null_reference", "cart.js", 2, src);
        assert!(text.contains("  if (order != null) {\n    const n = order.items.length;\n  } else {\n    return null;\n  }"));
    }

    #[test]
    fn test_null_guard_module_level_uses_pass() {
        let src = "import os\nvalue = config.get('x')\n";
        let (_, text) = patched("null_pointer", "cfg.py", 2, src);
        assert!(text.contains("if config is not None:\n    value = config.get('x')\nelse:\n    pass"));
    }

    #[test]
    fn test_resource_leak_python_with() {
        let src = "def read(path):\n    f = open(path)\n    data = f.read()\n    f.close()\n    return data\n";
        let (imp, text) = patched("resource_leak", "io.py", 2, src);
        assert_eq!(
            text,
            "def read(path):\n    with open(path) as f:\n        data = f.read()\n    return data\n"
        );
        assert_eq!(imp.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_resource_leak_java_try_with_resources() {
        let src = "class R {\n    String read(String p) {\n        BufferedReader r = new BufferedReader(new FileReader(p));\n        String line = r.readLine();\n        return line;\n    }\n}\n";
        let (_, text) = patched("resource_leak", "R.java", 3, src);
        assert!(text.contains("        try (BufferedReader r = new BufferedReader(new FileReader(p))) {\n            String line = r.readLine();\n        }"));
    }

    #[test]
    fn test_resource_leak_go_defer() {
        let src = "package main\n\nimport \"os\"\n\nfunc read() error {\n\tf, err := os.Open(\"x\")\n\tif err != nil {\n\t\treturn err\n\t}\n\tf.Stat()\n\treturn nil\n}\n";
        let (_, text) = patched("resource_leak", "main.go", 6, src);
        assert!(text.contains("\t\treturn err\n\t}\n\tdefer f.Close()\n\tf.Stat()"));
    }

    #[test]
    fn test_sql_injection_python() {
        let src = "def find(cursor, user_id):\n    query = \"SELECT * FROM users WHERE id = '\" + user_id + \"'\"\n    cursor.execute(query)\n";
        let (_, text) = patched("sql_injection", "db.py", 2, src);
        assert_eq!(
            text,
            "def find(cursor, user_id):\n    query = \"SELECT * FROM users WHERE id = ?\"\n    params = (user_id,)\n    cursor.execute(query, params)\n"
        );
    }

    #[test]
    fn test_sql_injection_javascript() {
        let src = "function find(db, id) {\n  const sql = \"SELECT * FROM t WHERE id = \" + id;\n  return db.query(sql);\n}\n";
        let (_, text) = patched("sql_injection", "db.js", 2, src);
        assert!(text.contains("const sql = \"SELECT * FROM t WHERE id = ?\";\n  const params = [id];"));
        assert!(text.contains("db.query(sql, params)"));
    }

    #[test]
    fn test_hardcoded_credentials_python_adds_import() {
        let src = "import sys\n\nAPI_KEY = \"sk-123\"\n";
        let (imp, text) = patched("hardcoded_credentials", "settings.py", 3, src);
        assert_eq!(
            text,
            "import os\nimport sys\n\nAPI_KEY = os.environ.get(\"API_KEY\")  # Set the API_KEY environment variable\n"
        );
        assert_eq!(imp.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_python_import_goes_below_future_imports() {
        let src = "from __future__ import annotations\n\nAPI_KEY = \"sk-1\"\n";
        let (_, text) = patched("hardcoded_credentials", "settings.py", 3, src);
        assert_eq!(
            text,
            "from __future__ import annotations\nimport os\n\nAPI_KEY = os.environ.get(\"API_KEY\")  # Set the API_KEY environment variable\n"
        );
    }

    #[test]
    fn test_python_import_goes_below_docstring_and_future_imports() {
        let src = "\"\"\"Loader.\"\"\"\nfrom __future__ import annotations\nimport sys\n\ndef load():\n    try:\n        return parse()\n    except ValueError:\n        pass\n";
        let (_, text) = patched("exception_swallowing", "load.py", 9, src);
        assert!(text.starts_with(
            "\"\"\"Loader.\"\"\"\nfrom __future__ import annotations\nimport logging\nimport sys\n"
        ));
    }

    #[test]
    fn test_python_import_skips_multiline_docstring() {
        let src = "\"\"\"Settings.\n\nRead at startup.\n\"\"\"\nAPI_KEY = \"abc\"\n";
        let (_, text) = patched("hardcoded_credentials", "settings.py", 5, src);
        assert!(text.starts_with(
            "\"\"\"Settings.\n\nRead at startup.\n\"\"\"\nimport os\nAPI_KEY = os.environ.get(\"API_KEY\")"
        ));
    }

    #[test]
    fn test_hardcoded_credentials_javascript_camel_case() {
        let src = "const dbPassword = 'hunter2';\nconnect(dbPassword);\n";
        let (_, text) = patched("hardcoded_secret", "db.js", 1, src);
        assert!(text.starts_with(
            "const dbPassword = process.env.DB_PASSWORD;  // Set the DB_PASSWORD environment variable\n"
        ));
    }

    #[test]
    fn test_hardcoded_credentials_go_const_becomes_var() {
        let src = "package main\n\nimport (\n\t\"fmt\"\n)\n\nconst apiToken = \"abc\"\n\nfunc main() { fmt.Println(apiToken) }\n";
        let (_, text) = patched("hardcoded_credentials", "main.go", 7, src);
        assert!(text.contains("import (\n\t\"os\"\n\t\"fmt\"\n)"));
        assert!(text.contains("var apiToken = os.Getenv(\"API_TOKEN\")"));
    }

    #[test]
    fn test_exception_swallowing_python() {
        let src = "def load():\n    try:\n        return parse()\n    except ValueError:\n        pass\n";
        let (imp, text) = patched("exception_swallowing", "load.py", 5, src);
        assert_eq!(
            text,
            "import logging\ndef load():\n    try:\n        return parse()\n    except ValueError as e:\n        logging.exception(\"Unhandled error: %s\", e)\n        return None\n"
        );
        assert_eq!(imp.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_exception_swallowing_javascript_bare_catch() {
        let src = "function load() {\n  try {\n    return parse();\n  } catch {\n  }\n}\n";
        let (_, text) = patched("swallowed_exception", "load.js", 4, src);
        assert!(text.contains("  } catch (err) {\n    console.error(\"Unhandled error:\", err);\n    return null;\n  }"));
    }

    #[test]
    fn test_exception_swallowing_java_adds_logging_imports() {
        let src = "package app;\n\nclass L {\n    Object load() {\n        try {\n            return parse();\n        } catch (Exception e) {\n        }\n    }\n}\n";
        let (_, text) = patched("exception_swallowing", "L.java", 7, src);
        assert!(text.starts_with(
            "package app;\nimport java.util.logging.Level;\nimport java.util.logging.Logger;\n"
        ));
        assert!(text.contains("Logger.getGlobal().log(Level.SEVERE, \"Unhandled error\", e);"));
    }

    #[test]
    fn test_generic_fixme() {
        let src = "def f(x):\n    y = compute(x)\n";
        let (imp, text) = patched("race_condition", "a.py", 2, src);
        assert_eq!(
            text,
            "def f(x):\n    # FIXME: race_condition reported at line 2 (fix it)\n    y = compute(x)\n"
        );
        assert_eq!(imp.bug_type, BugKind::Generic);
    }

    #[test]
    fn test_missing_file_gives_empty_implementation() {
        let imp = PatchGenerator::new().generate(
            &strategy("null_pointer", "missing.py", 1),
            &HashMap::new(),
            &fixed_ctx(),
        );
        assert!(imp.patches.is_empty());
        assert_eq!(imp.risk_level, RiskLevel::High);
        assert!(imp.error.as_deref().unwrap().contains("missing.py"));
    }

    #[test]
    fn test_line_out_of_range_gives_empty_implementation() {
        let imp = PatchGenerator::new().generate(
            &strategy("null_pointer", "a.py", 40),
            &files("a.py", "x = 1\n"),
            &fixed_ctx(),
        );
        assert!(imp.is_empty());
        assert!(imp.error.is_some());
    }

    #[test]
    fn test_pattern_not_found_gives_empty_implementation() {
        let imp = PatchGenerator::new().generate(
            &strategy("resource_leak", "a.py", 1),
            &files("a.py", "x = 1\n"),
            &fixed_ctx(),
        );
        assert!(imp.is_empty());
        assert!(imp.error.as_deref().unwrap().starts_with("cannot generate"));
    }

    #[test]
    fn test_implementation_id_is_deterministic() {
        let s = strategy("null_pointer", "a.py", 1);
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let a = implementation_id(&s, ts);
        assert_eq!(a, implementation_id(&s, ts));
        assert!(a.starts_with("impl_"));
        assert_eq!(a.len(), "impl_".len() + 12);
        assert_ne!(a, implementation_id(&s, ts + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_confidence_and_risk_rules() {
        let ok = ValidationResult::ok();
        let bad = ValidationResult::from_errors(vec!["boom".into()]);
        assert!((confidence(&ok, 1) - 0.9).abs() < 1e-9);
        assert!((confidence(&bad, 1) - 0.5).abs() < 1e-9);
        assert!((confidence(&ok, 6) - 0.8).abs() < 1e-9);
        assert_eq!(risk(BugKind::SqlInjection, &ok, 1), RiskLevel::Medium);
        assert_eq!(risk(BugKind::NullPointer, &bad, 1), RiskLevel::High);
        assert_eq!(risk(BugKind::Generic, &ok, 6), RiskLevel::High);
    }
}
