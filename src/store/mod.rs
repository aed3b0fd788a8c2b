pub mod document;
pub mod lock;
pub mod relational;

use std::fs::File;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::Serialize;

use crate::error::Result;
use crate::model::{LegacyTaskRecord, NewTask, TaskRecord};
use crate::store::document::DocumentStore;
use crate::store::relational::RelationalStore;
use crate::transform::RecordError;

/// One legacy row as read, or the reason it could not be read.
pub type LegacyRow = std::result::Result<LegacyTaskRecord, RecordError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum BackendKind {
    Document,
    Relational,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Relational => "relational",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured backend, not yet connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Document(PathBuf),
    Relational(PathBuf),
}

impl Target {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Document(_) => BackendKind::Document,
            Self::Relational(_) => BackendKind::Relational,
        }
    }

    pub fn connect(&self) -> Result<Box<dyn TaskBackend>> {
        let backend: Box<dyn TaskBackend> = match self {
            Self::Document(root) => Box::new(DocumentStore::connect(root)?),
            Self::Relational(path) => Box::new(RelationalStore::connect(path)?),
        };
        Ok(backend)
    }
}

/// An index on the unified container, as `name` over `keys` in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

/// Indexes every unified container carries. The composite one serves the
/// per-user categorized listing.
pub const UNIFIED_INDEXES: [IndexSpec; 4] = [
    IndexSpec {
        name: "idx_user_id",
        keys: &["user_id"],
    },
    IndexSpec {
        name: "idx_due_time",
        keys: &["due_time"],
    },
    IndexSpec {
        name: "idx_status",
        keys: &["status"],
    },
    IndexSpec {
        name: "idx_user_status_due",
        keys: &["user_id", "status", "due_time"],
    },
];

/// Storage operations the migration needs from a backend. Container names
/// are always supplied by the caller.
pub trait TaskBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Take the backend's exclusive migration lock. Held until the file drops.
    fn lock(&self) -> Result<File>;

    fn list_containers(&self) -> Result<Vec<String>>;

    fn count_records(&self, container: &str) -> Result<usize>;

    /// Read every record of a legacy container. Malformed rows come back as
    /// `Err` entries in read order rather than failing the whole read.
    fn read_legacy(&self, container: &str) -> Result<Vec<LegacyRow>>;

    /// Create the unified container and its indexes if absent. Returns the
    /// index names now present.
    fn ensure_unified(&self, container: &str) -> Result<Vec<String>>;

    /// Insert a batch, all or nothing. Returns the number written.
    ///
    /// When `from` names the legacy container the batch was read from, a
    /// written marker for it is committed together with the batch, so a
    /// later run can tell that only the archive step is left.
    fn insert_tasks(
        &self,
        container: &str,
        tasks: &[NewTask],
        from: Option<&str>,
    ) -> Result<usize>;

    /// Records written from `legacy` by an earlier run that never archived
    /// it, or `None` if it has not been written.
    fn written_marker(&self, legacy: &str) -> Result<Option<usize>>;

    /// Rename a container. Any written marker for `from` goes with it.
    fn rename_container(&self, from: &str, to: &str) -> Result<()>;

    /// Load the unified container; empty if it does not exist.
    fn load_tasks(&self, container: &str) -> Result<Vec<TaskRecord>>;

    fn list_indexes(&self, container: &str) -> Result<Vec<String>>;
}
