use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OpenFlags, OptionalExtension, ToSql, params};

use crate::error::{MigrateError, Result};
use crate::model::{LegacyTaskRecord, LegacyTime, NewTask, TaskRecord, TaskStatus, UserRef};
use crate::store::lock;
use crate::store::{BackendKind, LegacyRow, TaskBackend, UNIFIED_INDEXES};
use crate::transform::RecordError;

/// Legacy tables whose rows are already in the unified table but which have
/// not been archived yet.
const WRITTEN_LEDGER: &str = "_migrated_sources";

pub struct RelationalStore {
    conn: Connection,
    path: PathBuf,
}

impl RelationalStore {
    /// Open an existing database. The file is never created here: a missing
    /// database means the backend is unreachable, not empty.
    pub fn connect(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| MigrateError::Connection {
            backend: BackendKind::Relational.as_str(),
            message: format!("{}: {err}", path.display()),
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl TaskBackend for RelationalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn lock(&self) -> Result<File> {
        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(".migrate.lock");
        lock::acquire_lock(Path::new(&lock_path))
    }

    fn list_containers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1
             ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![WRITTEN_LEDGER], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn count_records(&self, container: &str) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{container}\""), [], |row| {
                    row.get(0)
                })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn read_legacy(&self, container: &str) -> Result<Vec<LegacyRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, user_id, task_detail, creation_time, lastedited_time, due_time
             FROM \"{container}\" ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let id = match row.get_ref(0)? {
                    ValueRef::Integer(n) => Some(n.to_string()),
                    ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                    _ => None,
                };
                Ok(legacy_from_row(row, id))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn ensure_unified(&self, container: &str) -> Result<Vec<String>> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{container}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id NOT NULL,
                task_detail TEXT NOT NULL,
                creation_time TEXT NOT NULL,
                lastedited_time TEXT NOT NULL,
                due_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'completed')),
                completion_time TEXT NULL,
                CHECK ((status = 'completed') = (completion_time IS NOT NULL))
            );"
        ))?;
        for spec in UNIFIED_INDEXES {
            self.conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON \"{container}\" ({});",
                spec.name,
                spec.keys.join(", ")
            ))?;
        }
        self.list_indexes(container)
    }

    fn insert_tasks(
        &self,
        container: &str,
        tasks: &[NewTask],
        from: Option<&str>,
    ) -> Result<usize> {
        let write_error = |errors: Vec<String>| MigrateError::Write {
            container: container.to_string(),
            errors,
        };

        let tx = self.conn.unchecked_transaction()?;
        let mut errors = Vec::new();
        let mut written: usize = 0;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO \"{container}\"
                     (user_id, task_detail, creation_time, lastedited_time, due_time, status, completion_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ))
                .map_err(|err| write_error(vec![err.to_string()]))?;

            for (position, task) in tasks.iter().enumerate() {
                let inserted = stmt.execute(params![
                    task.user_id,
                    task.task_detail,
                    sql_time(&task.creation_time),
                    sql_time(&task.lastedited_time),
                    sql_time(&task.due_time),
                    task.status.as_str(),
                    task.completion_time.as_ref().map(sql_time),
                ]);
                match inserted {
                    Ok(_) => written += 1,
                    Err(err) => errors.push(format!("record {position}: {err}")),
                }
            }
        }

        if let Some(legacy) = from {
            let marked = tx
                .execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS \"{WRITTEN_LEDGER}\" (
                        container TEXT PRIMARY KEY,
                        unified TEXT NOT NULL,
                        written INTEGER NOT NULL
                    );"
                ))
                .and_then(|()| {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO \"{WRITTEN_LEDGER}\" (container, unified, written)
                             VALUES (?1, ?2, ?3)"
                        ),
                        params![legacy, container, written],
                    )
                });
            if let Err(err) = marked {
                errors.push(format!("marker for {legacy}: {err}"));
            }
        }

        // Dropping the transaction rolls the whole batch back.
        if !errors.is_empty() {
            return Err(write_error(errors));
        }
        tx.commit()?;
        Ok(written)
    }

    fn written_marker(&self, legacy: &str) -> Result<Option<usize>> {
        if !self.table_exists(WRITTEN_LEDGER)? {
            return Ok(None);
        }
        let written = self
            .conn
            .query_row(
                &format!("SELECT written FROM \"{WRITTEN_LEDGER}\" WHERE container = ?1"),
                params![legacy],
                |row| row.get(0),
            )
            .optional()?;
        Ok(written)
    }

    fn rename_container(&self, from: &str, to: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!("ALTER TABLE \"{from}\" RENAME TO \"{to}\";"))?;
        if self.table_exists(WRITTEN_LEDGER)? {
            tx.execute(
                &format!("DELETE FROM \"{WRITTEN_LEDGER}\" WHERE container = ?1"),
                params![from],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_tasks(&self, container: &str) -> Result<Vec<TaskRecord>> {
        if !self.table_exists(container)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, user_id, task_detail, creation_time, lastedited_time, due_time,
                    status, completion_time
             FROM \"{container}\" ORDER BY id"
        ))?;
        let tasks = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let status: String = row.get(6)?;
                let completion: Option<String> = row.get(7)?;
                Ok(TaskRecord {
                    id: id.to_string(),
                    task: NewTask {
                        user_id: row.get(1)?,
                        task_detail: row.get(2)?,
                        creation_time: parse_sql_time(3, &row.get::<_, String>(3)?)?,
                        lastedited_time: parse_sql_time(4, &row.get::<_, String>(4)?)?,
                        due_time: parse_sql_time(5, &row.get::<_, String>(5)?)?,
                        status: status.parse::<TaskStatus>().map_err(|msg: String| {
                            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, msg.into())
                        })?,
                        completion_time: completion
                            .as_deref()
                            .map(|raw| parse_sql_time(7, raw))
                            .transpose()?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    fn list_indexes(&self, container: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND name NOT LIKE 'sqlite_autoindex_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![container], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

impl ToSql for UserRef {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            UserRef::Int(n) => ToSqlOutput::from(*n),
            UserRef::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for UserRef {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(n) => Ok(UserRef::Int(n)),
            ValueRef::Text(_) => value.as_str().map(|s| UserRef::Text(s.to_string())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Fixed-width UTC text so that index order matches time order.
fn sql_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_sql_time(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn legacy_from_row(row: &rusqlite::Row<'_>, id: Option<String>) -> LegacyRow {
    let id_ref = id.as_deref();
    let value = |idx: usize, field: &str| {
        row.get_ref(idx)
            .map_err(|err| RecordError::new(id_ref, field, err.to_string()))
    };
    let text = |bytes: &[u8], field: &str| {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|err| RecordError::new(id_ref, field, format!("not valid UTF-8: {err}")))
    };

    let user_id = match value(1, "user_id")? {
        ValueRef::Integer(n) => UserRef::Int(n),
        ValueRef::Text(t) => UserRef::Text(text(t, "user_id")?),
        _ => return Err(RecordError::new(id_ref, "user_id", "not an integer or text")),
    };
    let task_detail = match value(2, "task_detail")? {
        ValueRef::Text(t) => text(t, "task_detail")?,
        _ => return Err(RecordError::new(id_ref, "task_detail", "not text")),
    };

    let time = |idx: usize, field: &str| match value(idx, field)? {
        ValueRef::Text(t) => Ok(LegacyTime::Text(text(t, field)?)),
        ValueRef::Integer(n) => Ok(LegacyTime::Millis(n)),
        ValueRef::Null => Err(RecordError::new(id_ref, field, "is null")),
        _ => Err(RecordError::new(id_ref, field, "not text or integer")),
    };

    Ok(LegacyTaskRecord {
        creation_time: time(3, "creation_time")?,
        lastedited_time: time(4, "lastedited_time")?,
        due_time: time(5, "due_time")?,
        id,
        user_id,
        task_detail,
    })
}
