use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mend_core::priority::context::PriorityContext;
use mend_core::priority::graph::{FileRelations, RelationshipMap};
use mend_core::priority::{PriorityInput, PriorityScorer};
use mend_core::transform::apply_changes;
use mend_core::{BugReport, Change};
use std::collections::BTreeMap;

const SEVERITIES: [&str; 5] = ["critical", "high", "medium", "low", "info"];

fn synthetic_input(file_count: usize) -> PriorityInput {
    let mut bugs = Vec::with_capacity(file_count * 3);
    let mut relations = BTreeMap::new();

    for i in 0..file_count {
        let file = format!("src/feature_{:03}/file_{:05}.py", i % 120, i);
        for j in 0..(i % 4) {
            bugs.push(BugReport {
                id: format!("bug-{i}-{j}"),
                severity: SEVERITIES[(i + j) % SEVERITIES.len()].to_string(),
                bug_type: "null_pointer".to_string(),
                file: Some(file.clone()),
                affected_users: Some((i * 7 % 500) as u64),
                frequency: Some((j + 1) as f64),
                ..Default::default()
            });
        }
        let dependencies = (1..=3)
            .map(|k| format!("src/feature_{:03}/file_{:05}.py", (i + k) % 120, (i + k * 31) % file_count))
            .collect();
        relations.insert(
            file,
            FileRelations {
                dependencies,
                dependents: Vec::new(),
            },
        );
    }

    PriorityInput {
        bugs,
        relationships: Some(RelationshipMap::PerFile(relations)),
        tasks: Vec::new(),
    }
}

fn bench_priority_analysis(c: &mut Criterion) {
    let input = synthetic_input(2_000);
    let scorer = PriorityScorer::new();
    let context = PriorityContext {
        project_phase: Some("testing".to_string()),
        ..Default::default()
    };

    c.bench_function("analyze_priorities_2k_files", |b| {
        b.iter(|| {
            let analysis = scorer.analyze_priorities(black_box(&input), &context);
            black_box(analysis.file_ranking.len());
        });
    });
}

fn bench_line_transform(c: &mut Criterion) {
    let original: String = (0..50_000).map(|i| format!("line {i}\n")).collect();
    let changes: Vec<Change> = (0..500)
        .map(|i| {
            let line = i * 100 + 1;
            match i % 3 {
                0 => Change::replace(line, line + 2, "replaced\nblock"),
                1 => Change::insert(line, "inserted"),
                _ => Change::delete(line, line),
            }
        })
        .collect();

    c.bench_function("apply_changes_50k_lines", |b| {
        b.iter(|| {
            let out = apply_changes(black_box(&original), black_box(&changes)).expect("in range");
            black_box(out.len());
        });
    });
}

criterion_group!(perf_core, bench_priority_analysis, bench_line_transform);
criterion_main!(perf_core);
