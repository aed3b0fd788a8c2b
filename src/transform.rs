use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::MigrateError;
use crate::model::{LegacyTaskRecord, LegacyTime, NewTask, SourceKind, TaskStatus};

/// A single legacy record that could not be carried over. The record is
/// skipped; the rest of the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    pub field: String,
    pub message: String,
}

impl RecordError {
    pub fn new(legacy_id: Option<&str>, field: &str, message: impl Into<String>) -> Self {
        Self {
            legacy_id: legacy_id.map(str::to_string),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.legacy_id {
            Some(id) => write!(f, "record {id}: invalid {}: {}", self.field, self.message),
            None => write!(f, "record: invalid {}: {}", self.field, self.message),
        }
    }
}

impl From<RecordError> for MigrateError {
    fn from(err: RecordError) -> Self {
        MigrateError::RecordParse(err)
    }
}

/// Map a legacy record into the unified shape.
///
/// Completed records have no completion timestamp of their own, so their
/// `due_time` doubles as `completion_time`. Keep it that way.
pub fn transform(
    record: &LegacyTaskRecord,
    source: SourceKind,
) -> std::result::Result<NewTask, RecordError> {
    let id = record.id.as_deref();
    let creation_time = parse_time(&record.creation_time)
        .map_err(|msg| RecordError::new(id, "creation_time", msg))?;
    let lastedited_time = parse_time(&record.lastedited_time)
        .map_err(|msg| RecordError::new(id, "lastedited_time", msg))?;
    let due_time =
        parse_time(&record.due_time).map_err(|msg| RecordError::new(id, "due_time", msg))?;

    if lastedited_time < creation_time {
        return Err(RecordError::new(
            id,
            "lastedited_time",
            format!("{lastedited_time} precedes creation_time {creation_time}"),
        ));
    }

    let (status, completion_time) = match source {
        SourceKind::Completed => (TaskStatus::Completed, Some(due_time)),
        SourceKind::Due | SourceKind::Overdue => (TaskStatus::Pending, None),
    };

    Ok(NewTask {
        user_id: record.user_id.clone(),
        task_detail: record.task_detail.clone(),
        creation_time,
        lastedited_time,
        due_time,
        status,
        completion_time,
    })
}

/// Normalize a legacy timestamp to UTC.
///
/// Text may be RFC 3339, RFC 2822, `YYYY-MM-DD[ T]HH:MM:SS[.fff]` (read as
/// UTC) or a bare `YYYY-MM-DD` (midnight UTC). Integers are epoch millis.
pub fn parse_time(value: &LegacyTime) -> std::result::Result<DateTime<Utc>, String> {
    match value {
        LegacyTime::Millis(ms) => DateTime::from_timestamp_millis(*ms)
            .ok_or_else(|| format!("epoch millis {ms} out of range")),
        LegacyTime::Text(text) => parse_text(text),
    }
}

fn parse_text(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    let raw = text.trim();
    if raw.is_empty() {
        return Err("empty timestamp".into());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        && let Some(naive) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(naive.and_utc());
    }

    Err(format!("unrecognized timestamp '{raw}'"))
}
