//! mend - self-healing code repair from the command line
//!
//! Analyze a bug location, generate and apply a fix with backups, roll it
//! back, or rank files, tasks and bugs by priority. Results are printed to
//! stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mend_adapters::backup::BackupStore;
use mend_adapters::config::Config;
use mend_adapters::workspace::collect_sources;
use mend_core::analyzer::{summarize_files, CodeAnalyzer};
use mend_core::priority::context::PriorityContext;
use mend_core::priority::graph::RelationshipMap;
use mend_core::priority::{PriorityInput, PriorityScorer, Task};
use mend_core::{BugKind, BugReport, Strategy};
use mend_engine::{ApplyOptions, GenerationContext, PatchApplier, PatchGenerator};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MEND_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "mend",
    about = "Generate, apply and roll back code fixes",
    long_about = "Generates line-level patches for reported bugs, applies them\n\
                  with backups and validation, and ranks work by priority.",
    version
)]
struct Cli {
    /// Repository root; file arguments are relative to it
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Debug logging (overridden by MEND_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the analysis of one bug location
    Analyze {
        file: PathBuf,
        #[arg(long)]
        line: usize,
        #[arg(long, default_value = "generic")]
        bug_type: String,
    },
    /// Summarize the structure of every source file under a folder
    Scan {
        /// Folder to walk (defaults to the repository root)
        dir: Option<PathBuf>,
    },
    /// Generate a fix for one bug location and apply it
    Fix {
        file: PathBuf,
        #[arg(long)]
        line: usize,
        #[arg(long)]
        bug_type: String,
        /// Offending code, recorded on the strategy
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_progressive: bool,
        /// Skip validation before and after writing
        #[arg(long)]
        no_validate: bool,
    },
    /// Restore the files changed by an implementation; lists ids when none given
    Rollback { implementation_id: Option<String> },
    /// Rank files, tasks and bugs
    Prioritize {
        /// JSON array of bug reports
        #[arg(long)]
        bugs: Option<PathBuf>,
        /// JSON file relationships (graph or per-file map)
        #[arg(long)]
        relationships: Option<PathBuf>,
        /// JSON array of tasks
        #[arg(long)]
        tasks: Option<PathBuf>,
        /// JSON priority context (overrides, boosts, deadline, phase)
        #[arg(long)]
        context: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let repo = cli.repo;
    match cli.command {
        Command::Analyze {
            file,
            line,
            bug_type,
        } => {
            let (path, content) = read_source(&repo, &file)?;
            let analysis = CodeAnalyzer::new()
                .analyze(&path, &content, line, BugKind::parse(&bug_type))
                .with_context(|| format!("Failed to analyze {}", path))?;
            print_json(&analysis)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Scan { dir } => {
            let root = dir.map(|d| repo.join(d)).unwrap_or_else(|| repo.clone());
            let files = collect_sources(&root)?;
            info!("scanning {} file(s) under {}", files.len(), root.display());
            print_json(&summarize_files(&files))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Fix {
            file,
            line,
            bug_type,
            code,
            dry_run,
            no_progressive,
            no_validate,
        } => {
            let config = Config::load(&repo);
            let mut options = ApplyOptions::from(config.apply);
            options.dry_run |= dry_run;
            if no_progressive {
                options.progressive = false;
            }
            if no_validate {
                options.validate_patches = false;
                options.validate_after_each_file = false;
            }
            fix(&repo, &config, &file, line, &bug_type, code, options)
        }
        Command::Rollback { implementation_id } => {
            let config = Config::load(&repo);
            let backups = BackupStore::new(config.backup_root(&repo));
            let Some(id) = implementation_id else {
                print_json(&backups.implementations()?)?;
                return Ok(ExitCode::SUCCESS);
            };
            let mut applier = PatchApplier::new(&repo, backups);
            let result = applier.recover(&id);
            print_json(&result)?;
            Ok(if result.files_failed.is_empty() && !result.files_restored.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Prioritize {
            bugs,
            relationships,
            tasks,
            context,
        } => {
            let config = Config::load(&repo);
            let input = PriorityInput {
                bugs: load_json::<Vec<BugReport>>(bugs.as_deref())?.unwrap_or_default(),
                relationships: load_json::<RelationshipMap>(relationships.as_deref())?,
                tasks: load_json::<Vec<Task>>(tasks.as_deref())?.unwrap_or_default(),
            };
            let mut ctx = load_json::<PriorityContext>(context.as_deref())?.unwrap_or_default();
            if ctx.business_value.is_empty() {
                ctx.business_value = config.priority.business_value.clone();
            }
            if ctx.project_phase.is_none() {
                ctx.project_phase = config.priority.project_phase.clone();
            }
            let scorer = PriorityScorer::with_file_weights(config.priority.file_weights);
            print_json(&scorer.analyze_priorities(&input, &ctx))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct FixReport<'a> {
    implementation: &'a mend_core::Implementation,
    apply_result: Option<mend_core::ApplyResult>,
}

fn fix(
    repo: &Path,
    config: &Config,
    file: &Path,
    line: usize,
    bug_type: &str,
    code: Option<String>,
    options: ApplyOptions,
) -> Result<ExitCode> {
    let (path, content) = read_source(repo, file)?;
    let strategy = Strategy {
        id: format!("cli_{}", uuid::Uuid::new_v4().simple()),
        name: format!("{} at {}:{}", bug_type, path, line),
        bug_type: bug_type.to_string(),
        bug_location: path.clone(),
        bug_line: line,
        bug_code: code.unwrap_or_default(),
        confidence: 1.0,
        affected_files: vec![path.clone()],
    };
    let files = HashMap::from([(path, content)]);
    let implementation =
        PatchGenerator::new().generate(&strategy, &files, &GenerationContext::default());

    if implementation.is_empty() {
        print_json(&FixReport {
            implementation: &implementation,
            apply_result: None,
        })?;
        return Ok(ExitCode::FAILURE);
    }

    let backups = BackupStore::new(config.backup_root(repo));
    let mut applier = PatchApplier::new(repo, backups);
    debug!("applying {} with {:?}", implementation.implementation_id, options);
    let result = applier.apply(&implementation, options);
    let ok = result.is_success();
    print_json(&FixReport {
        implementation: &implementation,
        apply_result: Some(result),
    })?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Read a file given relative to `repo` (or absolute); returns its
/// repo-relative path when it lies inside the repository.
fn read_source(repo: &Path, file: &Path) -> Result<(String, String)> {
    let candidate = if file.is_absolute() {
        file.to_path_buf()
    } else {
        repo.join(file.strip_prefix(repo).unwrap_or(file))
    };
    let full = fs::canonicalize(&candidate)
        .with_context(|| format!("Failed to read {}", candidate.display()))?;
    let content = fs::read_to_string(&full)
        .with_context(|| format!("Failed to read {}", full.display()))?;
    let root = fs::canonicalize(repo)
        .with_context(|| format!("Failed to resolve repository {}", repo.display()))?;
    let relative = full.strip_prefix(&root).unwrap_or(&full);
    Ok((relative.to_string_lossy().into_owned(), content))
}

fn load_json<T: DeserializeOwned>(path: Option<&Path>) -> Result<Option<T>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
