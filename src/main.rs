use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskmaster_migrate::build_info;
use taskmaster_migrate::config::{self, DOCUMENT_URI_ENV, LOG_ENV, LegacyLayout, SQLITE_PATH_ENV};
use taskmaster_migrate::error::Result;
use taskmaster_migrate::output::Format;
use taskmaster_migrate::store::BackendKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "taskmaster-migrate",
    version,
    about = "Consolidate legacy due/overdue/completed task stores into one tasks store"
)]
struct Cli {
    /// Output format for the final summary
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    format: Format,
    /// Document store connection string (file:///path or a directory path)
    #[arg(long, global = true, env = DOCUMENT_URI_ENV)]
    document_uri: Option<String>,
    /// Relational store database file
    #[arg(long, global = true, env = SQLITE_PATH_ENV)]
    sqlite_path: Option<PathBuf>,
    /// Only run against this backend
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = LOG_ENV, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Move legacy containers into the unified store and archive them (default)
    Migrate,
    /// Summarize the unified store: task count, indexes, derived categories
    Stats,
}

fn init_tracing(level: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match level.parse::<EnvFilter>() {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!(
                    "WARN: {LOG_ENV}='{level}' is not a valid tracing filter ({e}); falling back to 'info'"
                );
                EnvFilter::new("info")
            }
        },
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = build_info::git_sha().unwrap_or("unknown"),
        "taskmaster-migrate starting"
    );

    let targets = config::targets(
        cli.document_uri.as_deref(),
        cli.sqlite_path.as_deref(),
        cli.backend,
    )?;
    let layout = LegacyLayout::default();

    match cli.command.unwrap_or(Commands::Migrate) {
        Commands::Migrate => {
            taskmaster_migrate::commands::migrate::run(&targets, &layout, cli.format)
        }
        Commands::Stats => taskmaster_migrate::commands::stats::run(&targets, &layout, cli.format),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    let format = cli.format;
    if let Err(e) = run(cli) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            Format::Pretty => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
