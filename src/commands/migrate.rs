use std::thread;

use tracing::{info, warn};

use crate::config::{DOCUMENT_URI_ENV, LegacyLayout, SQLITE_PATH_ENV};
use crate::error::Result;
use crate::migrate::{MigrationReport, Migrator};
use crate::output::{self, Format};
use crate::store::{BackendKind, Target};

pub fn run(targets: &[Target], layout: &LegacyLayout, format: Format) -> Result<()> {
    if targets.is_empty() {
        warn!("no backend configured; set {DOCUMENT_URI_ENV} and/or {SQLITE_PATH_ENV}");
        return Ok(());
    }

    let runs = run_all(targets, layout);
    output::print_migration(&runs, format)?;

    for (backend, run) in runs {
        let report = run?;
        report.ensure_complete()?;
        info!(%backend, status = ?report.status, "backend done");
    }
    Ok(())
}

/// Backends touch disjoint resources, so each gets its own thread. Results
/// come back in `targets` order.
pub fn run_all(
    targets: &[Target],
    layout: &LegacyLayout,
) -> Vec<(BackendKind, Result<MigrationReport>)> {
    thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|target| (target.kind(), scope.spawn(move || migrate_one(target, layout))))
            .collect();
        handles
            .into_iter()
            .map(|(kind, handle)| {
                let run = handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                (kind, run)
            })
            .collect()
    })
}

fn migrate_one(target: &Target, layout: &LegacyLayout) -> Result<MigrationReport> {
    let backend = target.connect()?;
    Migrator::new(backend.as_ref(), layout).run()
}
