//! PriorityScorer: bounded [0,1] priorities for files, tasks and bugs.
//!
//! Each mode computes a fixed set of normalized factors, takes their weighted
//! sum and then runs the shared context adjustment. Every map is ordered so
//! the output is reproducible for identical input.

pub mod context;
pub mod graph;

use crate::bug::{BugReport, Severity};
use context::{apply_context, days_between, parse_timestamp, PriorityContext};
use graph::{DependencyGraph, RelationshipMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bug types that make a fix harder
const COMPLEX_BUG_TYPES: &[&str] = &["race_condition", "memory_leak", "concurrency", "deadlock"];

/// Per-mode weights for the file factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWeights {
    pub severity: f64,
    pub bug_count: f64,
    pub dependencies: f64,
    pub dependents: f64,
    pub complexity: f64,
    pub business_value: f64,
}

impl Default for FileWeights {
    fn default() -> Self {
        Self {
            severity: 0.35,
            bug_count: 0.15,
            dependencies: 0.20,
            dependents: 0.15,
            complexity: 0.05,
            business_value: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityResult {
    pub priority: f64,
    pub factors: BTreeMap<String, f64>,
    pub explanation: String,
}

impl PriorityResult {
    fn no_issues(explanation: impl Into<String>) -> Self {
        Self {
            priority: 0.0,
            factors: BTreeMap::new(),
            explanation: explanation.into(),
        }
    }
}

/// A unit of work handed to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default = "half")]
    pub importance: f64,
    #[serde(default = "half")]
    pub impact: f64,
    /// Estimated effort in [0,1]; larger is more work
    #[serde(default = "half")]
    pub effort: f64,
    /// Ids of prerequisite tasks
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub completed: bool,
}

fn half() -> f64 {
    0.5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityInput {
    #[serde(default)]
    pub bugs: Vec<BugReport>,
    #[serde(default)]
    pub relationships: Option<RelationshipMap>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub id: String,
    pub priority: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityAnalysis {
    pub file_priorities: BTreeMap<String, PriorityResult>,
    pub task_priorities: BTreeMap<String, PriorityResult>,
    pub bug_priorities: BTreeMap<String, PriorityResult>,
    pub file_ranking: Vec<RankedEntry>,
    pub task_ranking: Vec<RankedEntry>,
    pub bug_ranking: Vec<RankedEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct PriorityScorer {
    file_weights: FileWeights,
}

impl PriorityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_weights(file_weights: FileWeights) -> Self {
        Self { file_weights }
    }

    pub fn file_weights(&self) -> FileWeights {
        self.file_weights
    }

    /// Score files, tasks and bugs in one pass.
    pub fn analyze_priorities(
        &self,
        input: &PriorityInput,
        context: &PriorityContext,
    ) -> PriorityAnalysis {
        let mut file_priorities =
            self.score_files(&input.bugs, input.relationships.as_ref(), context);
        let task_priorities = self.score_tasks(&input.tasks, context);
        let bug_priorities = self.score_bugs(&input.bugs, context);

        // Overrides for ids no mode produced are reported as files
        for (id, &value) in &context.priority_overrides {
            if !file_priorities.contains_key(id)
                && !task_priorities.contains_key(id)
                && !bug_priorities.contains_key(id)
            {
                file_priorities.insert(
                    id.clone(),
                    PriorityResult {
                        priority: value.clamp(0.0, 1.0),
                        factors: BTreeMap::new(),
                        explanation: format!("override {:.2}", value),
                    },
                );
            }
        }

        PriorityAnalysis {
            file_ranking: ranking(&file_priorities),
            task_ranking: ranking(&task_priorities),
            bug_ranking: ranking(&bug_priorities),
            file_priorities,
            task_priorities,
            bug_priorities,
        }
    }

    /// File mode: bugs grouped by file plus their position in the graph.
    pub fn score_files(
        &self,
        bugs: &[BugReport],
        relationships: Option<&RelationshipMap>,
        context: &PriorityContext,
    ) -> BTreeMap<String, PriorityResult> {
        let graph = relationships.map(RelationshipMap::to_graph).unwrap_or_default();

        let mut bugs_by_file: BTreeMap<&str, Vec<&BugReport>> = BTreeMap::new();
        for bug in bugs {
            if let Some(file) = bug.file.as_deref() {
                bugs_by_file.entry(file).or_default().push(bug);
            }
        }

        let files: BTreeSet<&str> = bugs_by_file
            .keys()
            .copied()
            .chain(graph.nodes().map(String::as_str))
            .collect();

        let max_bugs = bugs_by_file.values().map(Vec::len).max().unwrap_or(0);
        let max_deps = files.iter().map(|f| graph.dependency_count(f)).max().unwrap_or(0);
        let max_dependents = files.iter().map(|f| graph.dependent_count(f)).max().unwrap_or(0);
        let max_depth = files.iter().map(|f| graph.depth(f)).max().unwrap_or(0);
        let max_relations = files
            .iter()
            .map(|f| graph.dependency_count(f) + graph.dependent_count(f))
            .max()
            .unwrap_or(0);
        let batch = Batch {
            max_bugs,
            max_deps,
            max_dependents,
            max_depth,
            max_relations,
        };

        let w = self.file_weights;
        let mut results = BTreeMap::new();
        for file in files {
            let file_bugs = bugs_by_file.get(file).map(Vec::as_slice).unwrap_or(&[]);
            if file_bugs.is_empty() {
                let result = match context.priority_overrides.get(file) {
                    Some(_) => adjusted(file, PriorityResult::no_issues("no known issues"), context),
                    None => PriorityResult::no_issues("no known issues"),
                };
                results.insert(file.to_string(), result);
                continue;
            }

            let factors = file_factors(file, file_bugs, &graph, &batch, context);
            let priority = w.severity * factors["severity"]
                + w.bug_count * factors["bug_count"]
                + w.dependencies * factors["dependencies"]
                + w.dependents * factors["dependents"]
                + w.complexity * factors["complexity"]
                + w.business_value * factors["business_value"];

            let max_severity = file_bugs
                .iter()
                .map(|b| b.severity_level())
                .max()
                .unwrap_or(Severity::Unknown);
            let explanation = format!(
                "{} bug(s), max severity {}, {} dependencies, {} dependents",
                file_bugs.len(),
                max_severity.as_str(),
                graph.dependency_count(file),
                graph.dependent_count(file)
            );

            results.insert(
                file.to_string(),
                adjusted(
                    file,
                    PriorityResult {
                        priority,
                        factors,
                        explanation,
                    },
                    context,
                ),
            );
        }
        results
    }

    /// Task mode: urgency, importance, impact, prerequisite completion, effort.
    pub fn score_tasks(
        &self,
        tasks: &[Task],
        context: &PriorityContext,
    ) -> BTreeMap<String, PriorityResult> {
        let completed: BTreeSet<&str> = tasks
            .iter()
            .filter(|t| t.completed)
            .map(|t| t.id.as_str())
            .collect();
        let now = context.now();

        let mut results = BTreeMap::new();
        for task in tasks {
            if task.completed {
                let result = match context.priority_overrides.get(&task.id) {
                    Some(_) => adjusted(&task.id, PriorityResult::no_issues("task completed"), context),
                    None => PriorityResult::no_issues("task completed"),
                };
                results.insert(task.id.clone(), result);
                continue;
            }

            let urgency = match task.deadline.as_deref().and_then(parse_timestamp) {
                Some(deadline) => {
                    let days = days_between(now, deadline);
                    if days <= 0.0 {
                        1.0
                    } else {
                        (1.0 - days / 30.0).clamp(0.0, 1.0)
                    }
                }
                None => 0.2,
            };
            let dependencies = if task.dependencies.is_empty() {
                1.0
            } else {
                let done = task
                    .dependencies
                    .iter()
                    .filter(|d| completed.contains(d.as_str()))
                    .count();
                done as f64 / task.dependencies.len() as f64
            };
            let importance = task.importance.clamp(0.0, 1.0);
            let impact = task.impact.clamp(0.0, 1.0);
            let effort = 1.0 - task.effort.clamp(0.0, 1.0);

            let priority = 0.30 * urgency
                + 0.25 * importance
                + 0.20 * impact
                + 0.15 * dependencies
                + 0.10 * effort;

            let factors = BTreeMap::from([
                ("urgency".to_string(), urgency),
                ("importance".to_string(), importance),
                ("impact".to_string(), impact),
                ("dependencies".to_string(), dependencies),
                ("effort".to_string(), effort),
            ]);
            let explanation = format!(
                "urgency {:.2}, importance {:.2}, impact {:.2}, {:.0}% of prerequisites done",
                urgency,
                importance,
                impact,
                dependencies * 100.0
            );
            results.insert(
                task.id.clone(),
                adjusted(
                    &task.id,
                    PriorityResult {
                        priority,
                        factors,
                        explanation,
                    },
                    context,
                ),
            );
        }
        results
    }

    /// Bug mode: severity, impact, frequency, complexity and age.
    pub fn score_bugs(
        &self,
        bugs: &[BugReport],
        context: &PriorityContext,
    ) -> BTreeMap<String, PriorityResult> {
        let max_users = bugs.iter().filter_map(|b| b.affected_users).max().unwrap_or(0);
        let max_frequency = bugs
            .iter()
            .filter_map(|b| b.frequency)
            .fold(0.0_f64, f64::max);
        let now = context.now();

        let mut results = BTreeMap::new();
        for bug in bugs {
            let severity = bug.severity_level().score();
            let users = match (bug.affected_users, max_users) {
                (Some(n), max) if max > 0 => n as f64 / max as f64,
                _ => 0.0,
            };
            let components = (bug.affected_components.len() as f64 / 5.0).min(1.0);
            let impact = 0.7 * users + 0.3 * components;
            let frequency = match bug.frequency {
                Some(f) if max_frequency > 0.0 => (f / max_frequency).clamp(0.0, 1.0),
                _ => 0.0,
            };
            let complexity = if is_complex_type(&bug.bug_type) { 0.8 } else { 0.4 };
            let age = bug
                .reported_date
                .as_deref()
                .and_then(parse_timestamp)
                .map(|reported| (days_between(reported, now) / 30.0).clamp(0.0, 1.0))
                .unwrap_or(0.0);

            let priority = 0.35 * severity
                + 0.25 * impact
                + 0.15 * frequency
                + 0.10 * complexity
                + 0.15 * age;

            let factors = BTreeMap::from([
                ("severity".to_string(), severity),
                ("impact".to_string(), impact),
                ("frequency".to_string(), frequency),
                ("complexity".to_string(), complexity),
                ("age".to_string(), age),
            ]);
            let explanation = format!(
                "{} {} bug, impact {:.2}, frequency {:.2}, age {:.2}",
                bug.severity_level().as_str(),
                if bug.bug_type.is_empty() { "untyped" } else { &bug.bug_type },
                impact,
                frequency,
                age
            );
            results.insert(
                bug.id.clone(),
                adjusted(
                    &bug.id,
                    PriorityResult {
                        priority,
                        factors,
                        explanation,
                    },
                    context,
                ),
            );
        }
        results
    }
}

/// Batch maxima used to normalize file factors.
struct Batch {
    max_bugs: usize,
    max_deps: usize,
    max_dependents: usize,
    max_depth: usize,
    max_relations: usize,
}

fn file_factors(
    file: &str,
    bugs: &[&BugReport],
    graph: &DependencyGraph,
    batch: &Batch,
    context: &PriorityContext,
) -> BTreeMap<String, f64> {
    let severity = decayed_severity(bugs);
    let bug_count = ratio(bugs.len(), batch.max_bugs);

    let depth_factor = if batch.max_depth > 0 {
        1.0 + graph.depth(file) as f64 / batch.max_depth as f64
    } else {
        1.0
    };
    let dependencies = (ratio(graph.dependency_count(file), batch.max_deps) * depth_factor).min(1.0);
    let dependents = ratio(graph.dependent_count(file), batch.max_dependents);

    let density = ratio(
        graph.dependency_count(file) + graph.dependent_count(file),
        batch.max_relations,
    );
    let complex_bugs = bugs.iter().filter(|b| is_complex_type(&b.bug_type)).count();
    let complexity = (0.3
        + extension_complexity(file)
        + 0.2 * density
        + (0.1 * complex_bugs as f64).min(0.3))
    .clamp(0.0, 1.0);

    let business_value = business_value(file, &context.business_value);

    BTreeMap::from([
        ("severity".to_string(), severity),
        ("bug_count".to_string(), bug_count),
        ("dependencies".to_string(), dependencies),
        ("dependents".to_string(), dependents),
        ("complexity".to_string(), complexity),
        ("business_value".to_string(), business_value),
    ])
}

/// Rank-decayed severity: the most severe bug dominates.
pub fn decayed_severity(bugs: &[&BugReport]) -> f64 {
    let mut scores: Vec<f64> = bugs.iter().map(|b| b.severity_level().score()).collect();
    scores.sort_by(|a, b| b.total_cmp(a));

    let mut weighted = 0.0;
    let mut total = 0.0;
    for (i, score) in scores.iter().enumerate() {
        let weight = (-0.5 * i as f64).exp();
        weighted += score * weight;
        total += weight;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

/// Fixed complexity contribution of a file's extension.
pub fn extension_complexity(path: &str) -> f64 {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "cpp" | "cc" | "cxx" | "hpp" => 0.8,
        "c" | "h" => 0.7,
        "java" | "cs" | "rs" => 0.6,
        "go" | "ts" | "tsx" => 0.5,
        "py" | "js" | "jsx" | "rb" | "php" => 0.4,
        _ => 0.3,
    }
}

/// Longest matching path-substring key wins; never below the 0.5 default.
pub fn business_value(path: &str, mapping: &BTreeMap<String, f64>) -> f64 {
    mapping
        .iter()
        .filter(|(key, _)| !key.is_empty() && path.contains(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, &value)| value.clamp(0.0, 1.0).max(0.5))
        .unwrap_or(0.5)
}

fn is_complex_type(bug_type: &str) -> bool {
    let lowered = bug_type.to_lowercase();
    COMPLEX_BUG_TYPES.iter().any(|t| lowered.contains(t))
}

fn ratio(value: usize, max: usize) -> f64 {
    if max == 0 {
        0.0
    } else {
        value as f64 / max as f64
    }
}

fn adjusted(id: &str, mut result: PriorityResult, context: &PriorityContext) -> PriorityResult {
    let (priority, notes) = apply_context(id, result.priority, context);
    result.priority = priority;
    if !notes.is_empty() {
        result.explanation = format!("{}; {}", result.explanation, notes.join(", "));
    }
    result
}

/// Sort by priority descending, then id ascending.
pub fn ranking(results: &BTreeMap<String, PriorityResult>) -> Vec<RankedEntry> {
    let mut ranked: Vec<RankedEntry> = results
        .iter()
        .map(|(id, r)| RankedEntry {
            id: id.clone(),
            priority: r.priority,
        })
        .collect();
    ranked.sort_by(|a, b| b.priority.total_cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bug(id: &str, file: &str, severity: &str) -> BugReport {
        BugReport {
            id: id.to_string(),
            severity: severity.to_string(),
            bug_type: "null_pointer".to_string(),
            file: Some(file.to_string()),
            ..Default::default()
        }
    }

    fn fixed_context() -> PriorityContext {
        PriorityContext {
            reference_time: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_override_is_reported_exactly() {
        let mut ctx = fixed_context();
        ctx.priority_overrides.insert("file2.py".into(), 0.95);
        let input = PriorityInput {
            bugs: vec![bug("b1", "file1.py", "critical"), bug("b2", "file2.py", "low")],
            ..Default::default()
        };
        let analysis = PriorityScorer::new().analyze_priorities(&input, &ctx);
        assert_eq!(analysis.file_priorities["file2.py"].priority, 0.95);

        // Also when the file is not part of the input
        let empty = PriorityScorer::new().analyze_priorities(&PriorityInput::default(), &ctx);
        assert_eq!(empty.file_priorities["file2.py"].priority, 0.95);
    }

    #[test]
    fn test_priorities_stay_in_bounds() {
        let mut ctx = fixed_context();
        ctx.priority_boosts.insert(".py".into(), 0.8);
        ctx.deadline = Some("2024-05-01".into());
        ctx.project_phase = Some("release".into());
        let relationships: RelationshipMap = serde_json::from_str(
            r#"{"a.py": {"dependencies": ["b.py", "c.cpp"]}, "b.py": {"dependencies": ["c.cpp"]}}"#,
        )
        .unwrap();
        let input = PriorityInput {
            bugs: vec![
                bug("b1", "a.py", "critical"),
                bug("b2", "a.py", "high"),
                bug("b3", "c.cpp", "info"),
            ],
            relationships: Some(relationships),
            tasks: vec![Task {
                id: "t1".into(),
                deadline: Some("2024-05-30".into()),
                importance: 1.0,
                impact: 1.0,
                effort: 0.0,
                dependencies: vec![],
                completed: false,
            }],
        };
        let analysis = PriorityScorer::new().analyze_priorities(&input, &ctx);
        let all = analysis
            .file_priorities
            .values()
            .chain(analysis.task_priorities.values())
            .chain(analysis.bug_priorities.values());
        for result in all {
            assert!((0.0..=1.0).contains(&result.priority), "{:?}", result);
            for value in result.factors.values() {
                assert!((0.0..=1.0).contains(value), "{:?}", result);
            }
        }
    }

    #[test]
    fn test_more_severe_file_ranks_higher() {
        let input = PriorityInput {
            bugs: vec![bug("b1", "a.py", "critical"), bug("b2", "b.py", "high")],
            ..Default::default()
        };
        let analysis = PriorityScorer::new().analyze_priorities(&input, &fixed_context());
        let a = analysis.file_priorities["a.py"].priority;
        let b = analysis.file_priorities["b.py"].priority;
        assert!(a >= b, "{} < {}", a, b);
        assert_eq!(analysis.file_ranking[0].id, "a.py");
    }

    #[test]
    fn test_files_without_bugs_score_zero() {
        let relationships: RelationshipMap =
            serde_json::from_str(r#"{"a.py": {"dependencies": ["lib.py"]}}"#).unwrap();
        let mut ctx = fixed_context();
        ctx.project_phase = Some("release".into());
        let results = PriorityScorer::new().score_files(
            &[bug("b1", "a.py", "medium")],
            Some(&relationships),
            &ctx,
        );
        assert_eq!(results["lib.py"].priority, 0.0);
        assert_eq!(results["lib.py"].explanation, "no known issues");
        assert!(results["a.py"].priority > 0.0);
    }

    #[test]
    fn test_decay_lets_worst_bug_dominate() {
        let a = bug("1", "f", "critical");
        let b = bug("2", "f", "info");
        let score = decayed_severity(&[&b, &a]);
        let expected = (1.0 + 0.1 * (-0.5_f64).exp()) / (1.0 + (-0.5_f64).exp());
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_output_is_reproducible() {
        let input = PriorityInput {
            bugs: vec![
                bug("b1", "a.py", "high"),
                bug("b2", "b.go", "low"),
                bug("b3", "a.py", "medium"),
            ],
            ..Default::default()
        };
        let mut reversed = input.clone();
        reversed.bugs.reverse();
        let scorer = PriorityScorer::new();
        let first = scorer.analyze_priorities(&input, &fixed_context());
        let second = scorer.analyze_priorities(&reversed, &fixed_context());
        assert_eq!(first.file_priorities, second.file_priorities);
        assert_eq!(first.bug_priorities, second.bug_priorities);
    }

    #[test]
    fn test_business_value_longest_key_and_floor() {
        let mapping = BTreeMap::from([
            ("src/".to_string(), 0.6),
            ("src/payments/".to_string(), 0.9),
            ("tests/".to_string(), 0.1),
        ]);
        assert_eq!(business_value("src/payments/charge.py", &mapping), 0.9);
        assert_eq!(business_value("src/util.py", &mapping), 0.6);
        assert_eq!(business_value("tests/test_x.py", &mapping), 0.5);
        assert_eq!(business_value("README.md", &mapping), 0.5);
    }

    #[test]
    fn test_task_mode() {
        let tasks = vec![
            Task {
                id: "setup".into(),
                deadline: None,
                importance: 0.5,
                impact: 0.5,
                effort: 0.5,
                dependencies: vec![],
                completed: true,
            },
            Task {
                id: "ship".into(),
                deadline: Some("2024-05-30".into()),
                importance: 1.0,
                impact: 1.0,
                effort: 0.0,
                dependencies: vec!["setup".into(), "unknown".into()],
                completed: false,
            },
        ];
        let results = PriorityScorer::new().score_tasks(&tasks, &fixed_context());
        assert_eq!(results["setup"].priority, 0.0);
        let ship = &results["ship"];
        assert_eq!(ship.factors["urgency"], 1.0);
        assert_eq!(ship.factors["dependencies"], 0.5);
        let expected = 0.30 + 0.25 + 0.20 + 0.15 * 0.5 + 0.10;
        assert!((ship.priority - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bug_mode_factors() {
        let mut old = bug("old", "a.py", "high");
        old.bug_type = "race_condition".into();
        old.reported_date = Some("2024-04-01".into());
        old.affected_users = Some(50);
        old.frequency = Some(2.0);
        let mut fresh = bug("fresh", "a.py", "high");
        fresh.affected_users = Some(100);
        fresh.frequency = Some(4.0);
        fresh.affected_components = vec!["api".into(); 10];

        let results = PriorityScorer::new().score_bugs(&[old, fresh], &fixed_context());
        assert_eq!(results["old"].factors["complexity"], 0.8);
        assert_eq!(results["old"].factors["age"], 1.0);
        assert_eq!(results["old"].factors["frequency"], 0.5);
        assert_eq!(results["fresh"].factors["impact"], 1.0);
        assert_eq!(results["fresh"].factors["age"], 0.0);
    }
}
