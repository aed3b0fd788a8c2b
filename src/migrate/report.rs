use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{MigrateError, Result};
use crate::model::SourceKind;
use crate::store::BackendKind;
use crate::transform::RecordError;

/// What happened to one legacy source. Retries only need to look at the
/// sources that are not `Migrated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceOutcome {
    Migrated { backup: String },
    /// Records are in the unified store but the legacy container is still
    /// in place. The next run archives it without writing the records again.
    PartiallyMigratedNotArchived { error: String },
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    /// Position in read order.
    pub index: usize,
    #[serde(flatten)]
    pub error: RecordError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub container: String,
    pub read_count: usize,
    pub migrated_count: usize,
    pub parse_errors: Vec<ParseFailure>,
    pub archived: bool,
    /// The records were written by an earlier run; only the archive step ran.
    pub resumed: bool,
    pub outcome: SourceOutcome,
}

impl SourceReport {
    pub fn skipped(source: SourceKind, container: &str) -> Self {
        Self {
            source,
            container: container.to_string(),
            read_count: 0,
            migrated_count: 0,
            parse_errors: Vec::new(),
            archived: false,
            resumed: false,
            outcome: SourceOutcome::Skipped,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            SourceOutcome::Failed { .. } | SourceOutcome::PartiallyMigratedNotArchived { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Skipped,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub indexes: Vec<String>,
    pub backups: Vec<String>,
    pub sources: Vec<SourceReport>,
}

impl MigrationReport {
    pub fn failed_sources(&self) -> Vec<SourceKind> {
        self.sources
            .iter()
            .filter(|s| s.is_failure())
            .map(|s| s.source)
            .collect()
    }

    pub fn source(&self, kind: SourceKind) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == kind)
    }

    /// Turn a partially failed run into the combined error operators see.
    pub fn ensure_complete(&self) -> Result<()> {
        let failed = self.failed_sources();
        if failed.is_empty() {
            return Ok(());
        }
        Err(MigrateError::Incomplete {
            backend: self.backend.as_str(),
            failed,
        })
    }
}
