//! Caller-supplied context and the adjustment shared by every scoring mode.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityContext {
    /// Exact id → final priority
    #[serde(default)]
    pub priority_overrides: BTreeMap<String, f64>,
    /// Id substring → additive boost
    #[serde(default)]
    pub priority_boosts: BTreeMap<String, f64>,
    /// ISO-8601 date or timestamp of the project deadline
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub project_phase: Option<String>,
    /// Path substring → business value, used in file mode
    #[serde(default)]
    pub business_value: BTreeMap<String, f64>,
    /// Fixed "now"; defaults to the wall clock
    #[serde(default)]
    pub reference_time: Option<DateTime<Utc>>,
}

impl PriorityContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Days from "now" until the deadline, if one parses.
    pub fn days_to_deadline(&self) -> Option<f64> {
        let deadline = parse_timestamp(self.deadline.as_deref()?)?;
        Some(days_between(self.now(), deadline))
    }
}

/// Fixed bonus for the current project phase.
pub fn phase_bonus(phase: &str) -> f64 {
    match phase.trim().to_lowercase().as_str() {
        "release" | "production" => 0.15,
        "testing" | "qa" => 0.10,
        "development" | "dev" => 0.05,
        _ => 0.0,
    }
}

/// Additive bonus for a deadline `days` away.
pub fn deadline_bonus(days: f64) -> f64 {
    if days <= 0.0 {
        0.3
    } else if days <= 3.0 {
        0.2
    } else if days <= 7.0 {
        0.1
    } else {
        0.0
    }
}

/// Apply overrides, boosts, deadline and phase to a base priority.
///
/// Returns the clamped priority and a note for each adjustment made.
/// An override replaces the score and nothing else is applied.
pub fn apply_context(id: &str, base: f64, context: &PriorityContext) -> (f64, Vec<String>) {
    if let Some(&value) = context.priority_overrides.get(id) {
        debug!("priority override for {}: {:.2}", id, value);
        return (value.clamp(0.0, 1.0), vec![format!("override {:.2}", value)]);
    }

    let mut priority = base;
    let mut notes = Vec::new();

    for (pattern, boost) in &context.priority_boosts {
        if !pattern.is_empty() && id.contains(pattern.as_str()) {
            priority += boost;
            notes.push(format!("boost '{}' {:+.2}", pattern, boost));
        }
    }

    if let Some(days) = context.days_to_deadline() {
        let bonus = deadline_bonus(days);
        if bonus > 0.0 {
            priority += bonus;
            notes.push(format!("deadline in {:.0} days {:+.2}", days.max(0.0), bonus));
        }
    }

    if let Some(phase) = context.project_phase.as_deref() {
        let bonus = phase_bonus(phase);
        if bonus > 0.0 {
            priority += bonus;
            notes.push(format!("{} phase {:+.2}", phase, bonus));
        }
    }

    if !notes.is_empty() {
        debug!("context adjusted {}: {:.3} -> {:.3}", id, base, priority);
    }
    (priority.clamp(0.0, 1.0), notes)
}

/// Parse RFC 3339 timestamps, naive timestamps (UTC) and plain dates.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 86_400.0
}
