use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;

use crate::error::{MigrateError, Result};
use crate::migrate::report::{MigrationReport, RunStatus, SourceOutcome};
use crate::store::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub due: usize,
    pub overdue: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub backend: BackendKind,
    pub container: String,
    pub total_tasks: usize,
    pub indexes: Vec<String>,
    pub categories: CategoryCounts,
}

/// Per-backend migration outcome. A fatal error replaces the report.
pub fn print_migration(runs: &[(BackendKind, Result<MigrationReport>)], format: Format) -> Result<()> {
    match format {
        Format::Json => {
            let values = runs
                .iter()
                .map(|(backend, run)| match run {
                    Ok(report) => serde_json::to_value(report),
                    Err(err) => Ok(error_value(*backend, err)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            println!("{}", serde_json::to_string(&json!({ "runs": values }))?);
        }
        Format::Pretty => {
            for (i, (backend, run)) in runs.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                match run {
                    Ok(report) => print_report_pretty(report),
                    Err(err) => println!(
                        "{} {}",
                        format!("{backend} migration").bold(),
                        format!("failed: {err}").red()
                    ),
                }
            }
        }
    }
    Ok(())
}

fn error_value(backend: BackendKind, err: &MigrateError) -> serde_json::Value {
    json!({
        "backend": backend,
        "error": err.code(),
        "message": err.to_string(),
    })
}

fn print_report_pretty(report: &MigrationReport) {
    let status = match report.status {
        RunStatus::Skipped => "skipped".dimmed(),
        RunStatus::Completed => "completed".green(),
        RunStatus::Failed => "failed".red(),
    };
    println!("{} {}", format!("{} migration", report.backend).bold(), status);
    if let Some(reason) = &report.skip_reason {
        println!("  {} {}", "reason:".dimmed(), reason);
        return;
    }

    println!("  {} {}", "indexes:".dimmed(), report.indexes.join(", "));
    for source in &report.sources {
        let outcome = match &source.outcome {
            SourceOutcome::Migrated { backup } if source.resumed => {
                format!("already written, archived as {backup}").green()
            }
            SourceOutcome::Migrated { backup } => format!("archived as {backup}").green(),
            SourceOutcome::PartiallyMigratedNotArchived { error } => {
                format!("migrated, NOT archived (re-run to archive): {error}").yellow()
            }
            SourceOutcome::Failed { error } => format!("failed: {error}").red(),
            SourceOutcome::Skipped => "not present".dimmed(),
        };
        println!(
            "  {:<10} read {:>5}  migrated {:>5}  rejected {:>3}  {}",
            source.source.to_string(),
            source.read_count,
            source.migrated_count,
            source.parse_errors.len(),
            outcome
        );
        for failure in &source.parse_errors {
            println!("    - #{} {}", failure.index, failure.error.to_string().yellow());
        }
    }
    if !report.backups.is_empty() {
        println!("  {} {}", "backups:".dimmed(), report.backups.join(", "));
    }
}

pub fn print_stats(runs: &[(BackendKind, Result<StatsReport>)], format: Format) -> Result<()> {
    match format {
        Format::Json => {
            let values = runs
                .iter()
                .map(|(backend, run)| match run {
                    Ok(stats) => serde_json::to_value(stats),
                    Err(err) => Ok(error_value(*backend, err)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            println!("{}", serde_json::to_string(&json!({ "stats": values }))?);
        }
        Format::Pretty => {
            for (backend, run) in runs {
                match run {
                    Ok(stats) => {
                        println!("{}", format!("{backend} store").bold());
                        println!(
                            "  {} {} ({})",
                            "tasks:".dimmed(),
                            stats.total_tasks,
                            stats.container
                        );
                        println!(
                            "  {} due {} | overdue {} | completed {}",
                            "categories:".dimmed(),
                            stats.categories.due,
                            stats.categories.overdue,
                            stats.categories.completed
                        );
                        println!("  {} {}", "indexes:".dimmed(), stats.indexes.join(", "));
                    }
                    Err(err) => println!(
                        "{} {}",
                        format!("{backend} store").bold(),
                        format!("unavailable: {err}").red()
                    ),
                }
            }
        }
    }
    Ok(())
}
