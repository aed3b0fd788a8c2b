use chrono::{DateTime, Utc};

use crate::config::LegacyLayout;
use crate::error::Result;
use crate::model::Category;
use crate::output::{self, CategoryCounts, Format, StatsReport};
use crate::store::{TaskBackend, Target};

pub fn run(targets: &[Target], layout: &LegacyLayout, format: Format) -> Result<()> {
    let now = Utc::now();
    let runs: Vec<_> = targets
        .iter()
        .map(|target| {
            let stats = target
                .connect()
                .and_then(|backend| collect(backend.as_ref(), &layout.unified, now));
            (target.kind(), stats)
        })
        .collect();

    output::print_stats(&runs, format)?;
    for (_, stats) in runs {
        stats?;
    }
    Ok(())
}

/// Summarize the unified container. Categories are derived at `now`.
pub fn collect(
    backend: &dyn TaskBackend,
    container: &str,
    now: DateTime<Utc>,
) -> Result<StatsReport> {
    let tasks = backend.load_tasks(container)?;
    let mut categories = CategoryCounts::default();
    for record in &tasks {
        match record.task.category(now) {
            Category::Due => categories.due += 1,
            Category::Overdue => categories.overdue += 1,
            Category::Completed => categories.completed += 1,
        }
    }

    Ok(StatsReport {
        backend: backend.kind(),
        container: container.to_string(),
        total_tasks: tasks.len(),
        indexes: backend.list_indexes(container)?,
        categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, TaskStatus, UserRef};
    use crate::store::document::DocumentStore;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn task(due_day: u32, status: TaskStatus) -> NewTask {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2024, 1, due_day, 0, 0, 0).unwrap();
        NewTask {
            user_id: UserRef::Int(1),
            task_detail: "t".into(),
            creation_time: created,
            lastedited_time: created,
            due_time: due,
            status,
            completion_time: (status == TaskStatus::Completed).then_some(due),
        }
    }

    #[test]
    fn counts_categories_at_the_given_instant() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::connect(dir.path()).unwrap();
        store.ensure_unified("tasks").unwrap();
        store
            .insert_tasks(
                "tasks",
                &[
                    task(2, TaskStatus::Pending),
                    task(20, TaskStatus::Pending),
                    task(3, TaskStatus::Completed),
                ],
                None,
            )
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let stats = collect(&store, "tasks", now).unwrap();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(
            stats.categories,
            CategoryCounts {
                due: 1,
                overdue: 1,
                completed: 1
            }
        );
        assert_eq!(stats.indexes.len(), 4);
    }

    #[test]
    fn missing_unified_container_reports_nothing() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::connect(dir.path()).unwrap();
        let stats = collect(&store, "tasks", Utc::now()).unwrap();
        assert_eq!(stats.total_tasks, 0);
        assert!(stats.indexes.is_empty());
    }
}
