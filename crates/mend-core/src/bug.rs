//! Inputs produced by the detector and strategy collaborators.

use serde::{Deserialize, Serialize};

/// The kinds of bug that have a dedicated fix template.
///
/// Detectors emit free-form labels; [`BugKind::parse`] folds the known
/// aliases onto the closed set and sends everything else to `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugKind {
    NullPointer,
    ResourceLeak,
    SqlInjection,
    HardcodedCredentials,
    ExceptionSwallowing,
    Generic,
}

impl BugKind {
    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "null_pointer" | "null_reference" | "null_deref" | "null_dereference"
            | "none_dereference" | "none_reference" | "nullpointerexception" => {
                BugKind::NullPointer
            }
            "resource_leak" | "file_leak" | "unclosed_resource" | "unclosed_file" => {
                BugKind::ResourceLeak
            }
            "sql_injection" | "sqli" => BugKind::SqlInjection,
            "hardcoded_credentials" | "hardcoded_credential" | "hardcoded_secret"
            | "hardcoded_password" | "hardcoded_secrets" => BugKind::HardcodedCredentials,
            "exception_swallowing" | "swallowed_exception" | "bare_except" | "empty_catch"
            | "silent_exception" => BugKind::ExceptionSwallowing,
            _ => BugKind::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BugKind::NullPointer => "null_pointer",
            BugKind::ResourceLeak => "resource_leak",
            BugKind::SqlInjection => "sql_injection",
            BugKind::HardcodedCredentials => "hardcoded_credentials",
            BugKind::ExceptionSwallowing => "exception_swallowing",
            BugKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for BugKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity labels as reported by detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Severity::Critical,
            "high" | "major" | "error" => Severity::High,
            "medium" | "moderate" | "warning" => Severity::Medium,
            "low" | "minor" => Severity::Low,
            "info" | "informational" | "trivial" => Severity::Info,
            _ => Severity::Unknown,
        }
    }

    /// Normalized severity score used by the priority scorer.
    pub fn score(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.8,
            Severity::Medium => 0.5,
            Severity::Low => 0.2,
            Severity::Info => 0.1,
            Severity::Unknown => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
            Severity::Unknown => "unknown",
        }
    }
}

/// A fix strategy handed over by the strategy formulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub bug_type: String,
    pub bug_location: String,
    pub bug_line: usize,
    #[serde(default)]
    pub bug_code: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

impl Strategy {
    pub fn kind(&self) -> BugKind {
        BugKind::parse(&self.bug_type)
    }
}

/// A bug as reported by a detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BugReport {
    pub id: String,
    #[serde(default)]
    pub severity: String,
    #[serde(rename = "type", alias = "bug_type", default)]
    pub bug_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "location", alias = "file_path")]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub affected_users: Option<u64>,
    #[serde(default)]
    pub affected_components: Vec<String>,
    /// ISO-8601 date or timestamp
    #[serde(default)]
    pub reported_date: Option<String>,
}

impl BugReport {
    pub fn severity_level(&self) -> Severity {
        Severity::parse(&self.severity)
    }
}
