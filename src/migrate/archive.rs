use chrono::{DateTime, Utc};

use crate::error::{MigrateError, Result};
use crate::store::TaskBackend;

/// Second granularity, identifier-safe on both backends.
pub const BACKUP_STAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

pub fn backup_stamp(at: DateTime<Utc>) -> String {
    at.format(BACKUP_STAMP_FORMAT).to_string()
}

pub fn backup_name(container: &str, stamp: &str) -> String {
    format!("{container}_backup_{stamp}")
}

/// Rename a fully migrated legacy container out of the way. Data is never
/// deleted. Only call once the container's write has been acknowledged.
///
/// Two runs inside the same second produce the same name; the second rename
/// then fails and is reported rather than overwriting the earlier backup.
pub fn archive(backend: &dyn TaskBackend, container: &str, stamp: &str) -> Result<String> {
    let backup = backup_name(container, stamp);
    backend
        .rename_container(container, &backup)
        .map_err(|err| MigrateError::Archive {
            container: container.to_string(),
            backup: backup.clone(),
            message: err.to_string(),
        })?;
    Ok(backup)
}
