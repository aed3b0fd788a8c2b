use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which legacy container a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Due,
    Overdue,
    Completed,
}

impl SourceKind {
    /// Fixed migration order.
    pub const ALL: [SourceKind; 3] = [Self::Due, Self::Overdue, Self::Completed];
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Due => write!(f, "due"),
            Self::Overdue => write!(f, "overdue"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Read-side view of a task. Always computed, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Due,
    Overdue,
    Completed,
}

impl Category {
    pub fn of(status: TaskStatus, due_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        match status {
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Pending if now > due_time => Self::Overdue,
            TaskStatus::Pending => Self::Due,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Due => write!(f, "due"),
            Self::Overdue => write!(f, "overdue"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Opaque reference to a user. Carried through migration untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A timestamp as the legacy stores held it: free text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyTime {
    Millis(i64),
    Text(String),
}

impl From<&str> for LegacyTime {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Row of `due_tasks`, `overdue_tasks` or `completed_tasks`. The variant is
/// implied by the container it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTaskRecord {
    /// Legacy identifier, kept for diagnostics only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: UserRef,
    pub task_detail: String,
    pub creation_time: LegacyTime,
    pub lastedited_time: LegacyTime,
    pub due_time: LegacyTime,
}

/// A unified task before the store assigns it an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: UserRef,
    pub task_detail: String,
    pub creation_time: DateTime<Utc>,
    pub lastedited_time: DateTime<Utc>,
    pub due_time: DateTime<Utc>,
    pub status: TaskStatus,
    pub completion_time: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn category(&self, now: DateTime<Utc>) -> Category {
        Category::of(self.status, self.due_time, now)
    }

    /// Status and completion time agree, and edits never precede creation.
    pub fn is_consistent(&self) -> bool {
        let status_ok = match self.status {
            TaskStatus::Completed => self.completion_time.is_some(),
            TaskStatus::Pending => self.completion_time.is_none(),
        };
        status_ok && self.creation_time <= self.lastedited_time
    }
}

/// A unified task as stored in `tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(flatten)]
    pub task: NewTask,
}
