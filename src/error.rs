use thiserror::Error;

use crate::model::SourceKind;
use crate::transform::RecordError;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("cannot reach {backend} store: {message}")]
    Connection {
        backend: &'static str,
        message: String,
    },

    #[error("{0}")]
    RecordParse(RecordError),

    #[error("write to '{container}' failed: {}", .errors.join("; "))]
    Write {
        container: String,
        errors: Vec<String>,
    },

    #[error("could not archive '{container}' as '{backup}': {message}")]
    Archive {
        container: String,
        backup: String,
        message: String,
    },

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{backend} migration incomplete; failed sources: {}", join_sources(.failed))]
    Incomplete {
        backend: &'static str,
        failed: Vec<SourceKind>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

fn join_sources(sources: &[SourceKind]) -> String {
    sources
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::RecordParse(_) => "record_parse_error",
            Self::Write { .. } => "write_error",
            Self::Archive { .. } => "archive_error",
            Self::Locked(_) => "locked",
            Self::Config(_) => "config_error",
            Self::Incomplete { .. } => "migration_incomplete",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Db(_) => "db_error",
        }
    }

    /// Connection faults halt a backend's run; everything else is collected
    /// into the per-source report.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Locked(_))
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
