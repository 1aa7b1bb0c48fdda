use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use remediate::backup::{new_run_id, BackupManager};
use remediate::config::{load_from_path, PipelineOptions};
use remediate::report::{FileResult, FileStatus, RunSummary};
use remediate::rule::{Category, RuleRegistry};
use remediate::{FrontEnd, Pipeline};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "remediate")]
#[command(about = "Rule-driven automatic fixes for Rust sources", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fix files in place (directories are searched for .rs files)
    Run {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// TOML file with pipeline options
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Compute fixes and diffs without backing up or writing files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Only run rules of this category (repeatable)
        #[arg(long = "category", value_name = "CATEGORY")]
        categories: Vec<Category>,

        /// Skip a rule by ID (repeatable)
        #[arg(long = "skip-rule", value_name = "ID")]
        skip_rules: Vec<String>,

        #[arg(long)]
        max_iterations: Option<usize>,

        /// Confidence below which files are flagged for review
        #[arg(long)]
        threshold: Option<f64>,

        /// Worker threads (0 = one per CPU)
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        backup_root: Option<PathBuf>,
    },

    /// List rules in execution order
    Rules,

    /// List backups of a file, newest first
    Backups {
        path: PathBuf,

        #[arg(long)]
        backup_root: Option<PathBuf>,
    },

    /// Restore a file from its latest (or a specific) backup
    Restore {
        path: PathBuf,

        /// Backup ID as shown by `backups`
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        backup_root: Option<PathBuf>,
    },

    /// Delete backups older than N days, keeping the newest per file
    Prune {
        #[arg(long)]
        days: u64,

        #[arg(long)]
        backup_root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            paths,
            config,
            dry_run,
            diff,
            json,
            categories,
            skip_rules,
            max_iterations,
            threshold,
            workers,
            backup_root,
        } => {
            let mut options = match config {
                Some(path) => load_from_path(&path)?,
                None => PipelineOptions::default(),
            };
            options.dry_run |= dry_run;
            options.enabled_categories.extend(categories);
            options.skip_rule_ids.extend(skip_rules);
            if let Some(n) = max_iterations {
                options.max_iterations = n;
            }
            if let Some(t) = threshold {
                options.confidence_threshold = t;
            }
            if let Some(w) = workers {
                options.workers = w;
            }
            if let Some(root) = backup_root {
                options.backup_root = root;
            }
            cmd_run(&paths, &options, diff, json)
        }

        Commands::Rules => cmd_rules(),

        Commands::Backups { path, backup_root } => cmd_backups(&path, backup_root),

        Commands::Restore {
            path,
            id,
            backup_root,
        } => cmd_restore(&path, id.as_deref(), backup_root),

        Commands::Prune { days, backup_root } => cmd_prune(days, backup_root),
    }
}

/// Logs go to stderr. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Expand directories to the files under them that `front_end` accepts,
/// skipping hidden directories and `target/`. Explicit file paths are
/// taken as given.
fn collect_sources(
    paths: &[PathBuf],
    backup_root: &Path,
    front_end: &dyn FrontEnd,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        let walker = WalkDir::new(path).into_iter().filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && (name.starts_with('.') || name == "target" || entry.path() == backup_root))
        });
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && front_end.accepts(entry.path()) {
                files.push(entry.path().to_path_buf());
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn cmd_run(paths: &[PathBuf], options: &PipelineOptions, show_diff: bool, json: bool) -> Result<()> {
    let pipeline = Pipeline::with_builtin_rules()?;
    let files = collect_sources(paths, &options.backup_root, pipeline.front_end())?;
    if files.is_empty() {
        anyhow::bail!("No Rust source files found");
    }

    let summary = pipeline.run(&files, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        render_summary(&summary, show_diff);
    }

    if summary.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

/// Helper: print a unified diff with colored lines
fn display_diff(diff: &str) {
    for line in diff.lines() {
        let colored = if line.starts_with("+++") || line.starts_with("---") {
            line.dimmed()
        } else if line.starts_with("@@") {
            line.cyan()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else {
            line.normal()
        };
        println!("{}", colored);
    }
}

fn render_file(file: &FileResult, dry_run: bool, show_diff: bool) {
    let path = file.path.display();
    match file.status() {
        FileStatus::Unchanged => {
            println!("{} {}: no changes", "⊙".dimmed(), path);
        }
        FileStatus::Fixed | FileStatus::Partial => {
            let verb = if dry_run { "Would apply" } else { "Applied" };
            let mark = if file.status() == FileStatus::Fixed {
                "✓".green()
            } else {
                "⊘".yellow()
            };
            println!(
                "{} {}: {} {} fix(es), {} skipped, {} failed (confidence {:.2})",
                mark,
                path,
                verb,
                file.applied_count(),
                file.skipped_count(),
                file.failed_count(),
                file.confidence
            );
            for record in file.fixes.iter().filter(|r| r.error.is_some()) {
                eprintln!(
                    "  {} {}: {}",
                    "✗".red(),
                    record.rule_id,
                    record.error.as_deref().unwrap_or_default()
                );
            }
        }
        FileStatus::Failed => {
            let reason = file
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            eprintln!("{} {}: Failed - {}", "✗".red(), path, reason);
        }
    }

    if file.low_confidence && file.error.is_none() {
        println!(
            "  {}",
            "Low confidence - manual review recommended".yellow()
        );
    }
    if file.max_iterations_reached {
        println!("  {}", "Iteration limit reached before converging".yellow());
    }
    if show_diff && !file.diff.is_empty() {
        println!();
        display_diff(&file.diff);
        println!();
    }
}

fn render_summary(summary: &RunSummary, show_diff: bool) {
    if summary.dry_run {
        println!("{}", "[DRY RUN - no files were written]".cyan());
    }

    for file in &summary.files {
        render_file(file, summary.dry_run, show_diff);
    }

    if !summary.rule_stats.is_empty() {
        println!();
        println!("{}", "Rules:".bold());
        for (id, stats) in &summary.rule_stats {
            println!(
                "  {:<28} fired {:>3}  applied {:>3}  skipped {:>3}  failed {:>3}",
                id, stats.fired, stats.applied, stats.skipped, stats.failed
            );
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!(
        "  {} fixed",
        format!("{}", summary.files_with_status(FileStatus::Fixed)).green()
    );
    println!(
        "  {} partial",
        format!("{}", summary.files_with_status(FileStatus::Partial)).yellow()
    );
    println!(
        "  {} unchanged",
        format!("{}", summary.files_with_status(FileStatus::Unchanged)).dimmed()
    );
    println!(
        "  {} failed",
        format!("{}", summary.files_with_status(FileStatus::Failed)).red()
    );
    println!("  success rate {:.0}%", summary.success_rate * 100.0);
    if summary.cancelled {
        println!("  {}", "Run was cancelled".yellow());
    }
}

fn cmd_rules() -> Result<()> {
    let registry = RuleRegistry::with_builtin()?;
    let mut current: Option<Category> = None;
    for (rule, enabled) in registry.iter() {
        if current != Some(rule.category()) {
            current = Some(rule.category());
            println!("{}", rule.category().to_string().bold());
        }
        let id = if enabled {
            rule.id().normal()
        } else {
            rule.id().dimmed()
        };
        println!("  {:<28} {}", id, rule.description());
    }
    Ok(())
}

fn backup_manager(root: Option<PathBuf>) -> Result<BackupManager> {
    let root = root.unwrap_or_else(|| PipelineOptions::default().backup_root);
    BackupManager::new(&root, new_run_id())
        .with_context(|| format!("opening backup root {}", root.display()))
}

fn cmd_backups(path: &Path, root: Option<PathBuf>) -> Result<()> {
    let manager = backup_manager(root)?;
    let records = manager.list(path)?;
    if records.is_empty() {
        println!("{}", format!("No backups for {}", path.display()).yellow());
        return Ok(());
    }

    for record in records {
        let tag = record
            .tag
            .as_deref()
            .map(|t| format!(" [{t}]"))
            .unwrap_or_default();
        println!("{}  run {}{}", record.id, record.run_id, tag.dimmed());
    }
    Ok(())
}

fn cmd_restore(path: &Path, id: Option<&str>, root: Option<PathBuf>) -> Result<()> {
    let manager = backup_manager(root)?;
    let record = match id {
        Some(id) => manager.find(path, id)?,
        None => manager
            .latest(path)?
            .with_context(|| format!("no backups for {}", path.display()))?,
    };

    let before = manager.restore(&record)?;
    println!(
        "{} Restored {} from {}",
        "✓".green(),
        path.display(),
        record.id
    );
    if let Some(before) = before {
        println!(
            "  {}",
            format!("Previous contents saved as {}", before.id).dimmed()
        );
    }
    Ok(())
}

fn cmd_prune(days: u64, root: Option<PathBuf>) -> Result<()> {
    let manager = backup_manager(root)?;
    let removed = manager.prune(Duration::from_secs(days.saturating_mul(86_400)))?;
    println!("Pruned {} backup(s)", removed.len());
    Ok(())
}
