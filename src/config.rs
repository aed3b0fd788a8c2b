use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};
use crate::model::SourceKind;
use crate::store::{BackendKind, Target};

pub const DOCUMENT_URI_ENV: &str = "TASKMASTER_DOCUMENT_URI";
pub const SQLITE_PATH_ENV: &str = "TASKMASTER_SQLITE_PATH";
pub const LOG_ENV: &str = "TASKMASTER_LOG";

/// Container names for one backend. Injected into the orchestrator so both
/// backends share a single code path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLayout {
    pub due: String,
    pub overdue: String,
    pub completed: String,
    pub unified: String,
}

impl Default for LegacyLayout {
    fn default() -> Self {
        Self {
            due: "due_tasks".into(),
            overdue: "overdue_tasks".into(),
            completed: "completed_tasks".into(),
            unified: "tasks".into(),
        }
    }
}

impl LegacyLayout {
    pub fn container(&self, kind: SourceKind) -> &str {
        match kind {
            SourceKind::Due => &self.due,
            SourceKind::Overdue => &self.overdue,
            SourceKind::Completed => &self.completed,
        }
    }

    /// Reject layouts where two roles share a name; the archive step would
    /// otherwise rename the unified container or another source.
    pub fn validate(&self) -> Result<()> {
        let names = [&self.due, &self.overdue, &self.completed, &self.unified];
        for (i, name) in names.iter().enumerate() {
            if !is_safe_identifier(name) {
                return Err(MigrateError::Config(format!(
                    "container name '{name}' must be non-empty ASCII alphanumeric/underscore"
                )));
            }
            if names[..i].contains(name) {
                return Err(MigrateError::Config(format!(
                    "container name '{name}' is used more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Names are spliced into SQL and used as directory names, so keep them plain.
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Resolve a document-store connection string to its root directory.
/// Accepts `file:///abs/path` or a bare filesystem path.
pub fn document_root_from_uri(uri: &str) -> Result<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(MigrateError::Config(format!("{DOCUMENT_URI_ENV} is empty")));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        if path.is_empty() {
            return Err(MigrateError::Config(format!(
                "document uri '{uri}' has no path"
            )));
        }
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(MigrateError::Config(format!(
            "unsupported document store scheme '{scheme}'"
        )));
    }
    Ok(PathBuf::from(uri))
}

/// Backends to run, in a fixed order. A backend without connection settings
/// is left out; `only` narrows the set further.
pub fn targets(
    document_uri: Option<&str>,
    sqlite_path: Option<&Path>,
    only: Option<BackendKind>,
) -> Result<Vec<Target>> {
    let wanted = |kind: BackendKind| only.is_none_or(|o| o == kind);
    let mut targets = Vec::new();
    if let Some(uri) = document_uri
        && wanted(BackendKind::Document)
    {
        targets.push(Target::Document(document_root_from_uri(uri)?));
    }
    if let Some(path) = sqlite_path
        && wanted(BackendKind::Relational)
    {
        targets.push(Target::Relational(path.to_path_buf()));
    }
    if let Some(kind) = only
        && targets.is_empty()
    {
        return Err(MigrateError::Config(format!(
            "--backend {kind} requested but it has no connection settings"
        )));
    }
    Ok(targets)
}
