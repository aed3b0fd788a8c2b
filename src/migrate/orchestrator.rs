use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn};

use crate::config::LegacyLayout;
use crate::error::{MigrateError, Result};
use crate::migrate::archive;
use crate::migrate::report::{
    MigrationReport, ParseFailure, RunStatus, SourceOutcome, SourceReport,
};
use crate::model::SourceKind;
use crate::store::TaskBackend;
use crate::transform::transform;

/// Moves the three legacy containers of one backend into the unified one.
///
/// Re-running is safe: archived sources no longer exist under their legacy
/// names, so detection skips them, and a source whose records were written
/// but never archived is only archived.
pub struct Migrator<'a> {
    backend: &'a dyn TaskBackend,
    layout: &'a LegacyLayout,
}

impl<'a> Migrator<'a> {
    pub fn new(backend: &'a dyn TaskBackend, layout: &'a LegacyLayout) -> Self {
        Self { backend, layout }
    }

    pub fn run(&self) -> Result<MigrationReport> {
        self.run_at(Utc::now())
    }

    /// Run with an explicit clock; `now` stamps the backup names.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<MigrationReport> {
        self.layout.validate()?;
        let kind = self.backend.kind();
        let _span = info_span!("migrate", backend = %kind).entered();
        let _lock = self.backend.lock()?;

        let existing = self
            .backend
            .list_containers()
            .map_err(|err| self.connection_error(err))?;
        let present: Vec<SourceKind> = SourceKind::ALL
            .into_iter()
            .filter(|&source| existing.iter().any(|c| c == self.layout.container(source)))
            .collect();

        if present.is_empty() {
            info!("no legacy containers found; nothing to migrate");
            return Ok(self.skipped(now, "already migrated or never provisioned"));
        }

        let mut pending = 0;
        let mut awaiting_archive = 0;
        for &source in &present {
            let container = self.layout.container(source);
            pending += self
                .backend
                .count_records(container)
                .map_err(|err| self.connection_error(err))?;
            if self
                .backend
                .written_marker(container)
                .map_err(|err| self.connection_error(err))?
                .is_some()
            {
                awaiting_archive += 1;
            }
        }
        if pending == 0 && awaiting_archive == 0 {
            info!(containers = present.len(), "legacy containers are empty; nothing to migrate");
            return Ok(self.skipped(now, "legacy containers hold no records"));
        }

        info!(
            containers = present.len(),
            records = pending,
            awaiting_archive,
            "legacy containers found"
        );
        let indexes = self.backend.ensure_unified(&self.layout.unified)?;
        info!(container = %self.layout.unified, indexes = ?indexes, "unified container ready");

        let stamp = archive::backup_stamp(now);
        let mut sources = Vec::with_capacity(SourceKind::ALL.len());
        for source in SourceKind::ALL {
            let container = self.layout.container(source);
            if present.contains(&source) {
                sources.push(self.migrate_source(source, &stamp)?);
            } else {
                sources.push(SourceReport::skipped(source, container));
            }
        }

        let backups = sources
            .iter()
            .filter_map(|s| match &s.outcome {
                SourceOutcome::Migrated { backup } => Some(backup.clone()),
                _ => None,
            })
            .collect();
        let status = if sources.iter().any(SourceReport::is_failure) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        Ok(MigrationReport {
            backend: kind,
            started_at: now,
            status,
            skip_reason: None,
            indexes,
            backups,
            sources,
        })
    }

    /// Read, transform, write, then archive a single source. Only fatal
    /// errors escape; everything else lands in the returned report.
    fn migrate_source(&self, source: SourceKind, stamp: &str) -> Result<SourceReport> {
        let container = self.layout.container(source);
        let _span = info_span!("source", source = %source, container).entered();
        let mut report = SourceReport::skipped(source, container);

        match self.backend.written_marker(container) {
            Ok(Some(written)) => {
                info!(written, "records already written by an earlier run; archiving only");
                report.resumed = true;
                return Ok(self.archive_source(report, container, stamp));
            }
            Ok(None) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(error = %err, "could not read written marker");
                report.outcome = SourceOutcome::Failed {
                    error: err.to_string(),
                };
                return Ok(report);
            }
        }

        let rows = match self.backend.read_legacy(container) {
            Ok(rows) => rows,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(error = %err, "read failed");
                report.outcome = SourceOutcome::Failed {
                    error: err.to_string(),
                };
                return Ok(report);
            }
        };
        report.read_count = rows.len();
        info!(records = rows.len(), "migrating");

        let mut tasks = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            match row.and_then(|record| transform(&record, source)) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    warn!(index, error = %err, "skipping record");
                    report.parse_errors.push(ParseFailure { index, error: err });
                }
            }
        }

        match self
            .backend
            .insert_tasks(&self.layout.unified, &tasks, Some(container))
        {
            Ok(written) => report.migrated_count = written,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(error = %err, "write failed; legacy container left in place");
                report.outcome = SourceOutcome::Failed {
                    error: err.to_string(),
                };
                return Ok(report);
            }
        }
        info!(
            migrated = report.migrated_count,
            rejected = report.parse_errors.len(),
            "records written"
        );

        Ok(self.archive_source(report, container, stamp))
    }

    /// Rename a written source out of the way. A failed rename leaves the
    /// written marker in place for the next run.
    fn archive_source(
        &self,
        mut report: SourceReport,
        container: &str,
        stamp: &str,
    ) -> SourceReport {
        report.outcome = match archive::archive(self.backend, container, stamp) {
            Ok(backup) => {
                info!(backup = %backup, "legacy container archived");
                report.archived = true;
                SourceOutcome::Migrated { backup }
            }
            Err(err) => {
                warn!(error = %err, "records migrated but archive failed; re-run to archive");
                SourceOutcome::PartiallyMigratedNotArchived {
                    error: err.to_string(),
                }
            }
        };
        report
    }

    fn skipped(&self, now: DateTime<Utc>, reason: &str) -> MigrationReport {
        MigrationReport {
            backend: self.backend.kind(),
            started_at: now,
            status: RunStatus::Skipped,
            skip_reason: Some(reason.to_string()),
            indexes: Vec::new(),
            backups: Vec::new(),
            sources: SourceKind::ALL
                .into_iter()
                .map(|source| SourceReport::skipped(source, self.layout.container(source)))
                .collect(),
        }
    }

    fn connection_error(&self, err: MigrateError) -> MigrateError {
        match err {
            MigrateError::Connection { .. } | MigrateError::Locked(_) => err,
            other => MigrateError::Connection {
                backend: self.backend.kind().as_str(),
                message: other.to_string(),
            },
        }
    }
}
