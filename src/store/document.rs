//! Document store: one directory per collection, one JSON file per document.
//!
//! ```text
//! <root>/
//!   .migrate.lock
//!   due_tasks/<id>.json
//!   due_tasks/_migrated.json # written marker, once copied into tasks
//!   tasks/<id>.json
//!   tasks/_indexes.json      # index catalog: name -> keys
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{MigrateError, Result};
use crate::model::{LegacyTaskRecord, LegacyTime, NewTask, TaskRecord, UserRef};
use crate::store::lock;
use crate::store::{BackendKind, LegacyRow, TaskBackend, UNIFIED_INDEXES};
use crate::transform::RecordError;

const INDEX_CATALOG: &str = "_indexes.json";
const WRITTEN_MARKER: &str = "_migrated.json";

/// Left in a legacy collection once its records are in the unified one.
#[derive(Debug, Serialize, Deserialize)]
struct WrittenMarker {
    unified: String,
    written: usize,
}

pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Open an existing store root. A missing root is a connection failure;
    /// the store is never created implicitly.
    pub fn connect(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(MigrateError::Connection {
                backend: BackendKind::Document.as_str(),
                message: format!("'{}' is not a directory", root.display()),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn read_catalog(&self, container: &str) -> Result<BTreeMap<String, Vec<String>>> {
        let path = self.collection_dir(container).join(INDEX_CATALOG);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_error(container: &str, errors: Vec<String>) -> MigrateError {
        MigrateError::Write {
            container: container.to_string(),
            errors,
        }
    }
}

impl TaskBackend for DocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn lock(&self) -> Result<File> {
        lock::acquire_lock(&self.root.join(".migrate.lock"))
    }

    fn list_containers(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn count_records(&self, container: &str) -> Result<usize> {
        Ok(document_paths(&self.collection_dir(container))?.len())
    }

    fn read_legacy(&self, container: &str) -> Result<Vec<LegacyRow>> {
        let mut rows = Vec::new();
        for path in document_paths(&self.collection_dir(container))? {
            let fallback_id = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
            let parsed = fs::read(&path)
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<Value>(&bytes).map_err(|err| err.to_string())
                });
            rows.push(match parsed {
                Ok(doc) => legacy_from_document(&doc, fallback_id),
                Err(message) => Err(RecordError::new(
                    fallback_id.as_deref(),
                    "document",
                    message,
                )),
            });
        }
        Ok(rows)
    }

    fn ensure_unified(&self, container: &str) -> Result<Vec<String>> {
        fs::create_dir_all(self.collection_dir(container))?;

        let mut catalog = self.read_catalog(container)?;
        let mut changed = false;
        for spec in UNIFIED_INDEXES {
            if !catalog.contains_key(spec.name) {
                catalog.insert(
                    spec.name.to_string(),
                    spec.keys.iter().map(|k| k.to_string()).collect(),
                );
                changed = true;
            }
        }
        if changed {
            let path = self.collection_dir(container).join(INDEX_CATALOG);
            fs::write(path, serde_json::to_string_pretty(&catalog)?)?;
        }

        Ok(catalog.into_keys().collect())
    }

    fn insert_tasks(
        &self,
        container: &str,
        tasks: &[NewTask],
        from: Option<&str>,
    ) -> Result<usize> {
        let target = self.collection_dir(container);
        if !target.is_dir() {
            return Err(Self::write_error(
                container,
                vec!["collection does not exist".into()],
            ));
        }
        if let Some(legacy) = from
            && !self.collection_dir(legacy).is_dir()
        {
            return Err(Self::write_error(
                container,
                vec![format!("legacy collection '{legacy}' does not exist")],
            ));
        }

        // Stage the whole batch first so a bad document leaves nothing behind.
        let staging = self.root.join(format!(".staging.{}", Uuid::new_v4()));
        fs::create_dir_all(&staging)?;

        let mut moves = Vec::with_capacity(tasks.len() + 1);
        let mut errors = Vec::new();
        for (position, task) in tasks.iter().enumerate() {
            let record = TaskRecord {
                id: Uuid::new_v4().to_string(),
                task: task.clone(),
            };
            let filename = format!("{}.json", record.id);
            let staged = staging.join(&filename);
            match stage(&staged, &record) {
                Ok(()) => moves.push((staged, target.join(&filename))),
                Err(err) => errors.push(format!("record {position}: {err}")),
            }
        }

        // The marker moves last: once it lands, the whole batch has.
        if let Some(legacy) = from {
            let marker = WrittenMarker {
                unified: container.to_string(),
                written: tasks.len(),
            };
            let staged = staging.join(WRITTEN_MARKER);
            match stage(&staged, &marker) {
                Ok(()) => moves.push((staged, self.collection_dir(legacy).join(WRITTEN_MARKER))),
                Err(err) => errors.push(format!("{WRITTEN_MARKER}: {err}")),
            }
        }

        let committed = if errors.is_empty() {
            commit_staged(&moves)
        } else {
            Err(errors)
        };
        let _ = fs::remove_dir_all(&staging);
        committed
            .map(|_| tasks.len())
            .map_err(|errors| Self::write_error(container, errors))
    }

    fn written_marker(&self, legacy: &str) -> Result<Option<usize>> {
        let path = self.collection_dir(legacy).join(WRITTEN_MARKER);
        if !path.is_file() {
            return Ok(None);
        }
        let marker: WrittenMarker = serde_json::from_slice(&fs::read(path)?)?;
        Ok(Some(marker.written))
    }

    fn rename_container(&self, from: &str, to: &str) -> Result<()> {
        let source = self.collection_dir(from);
        let dest = self.collection_dir(to);
        if !source.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("collection '{from}' does not exist"),
            )
            .into());
        }
        // rename(2) happily replaces an empty directory; never overwrite.
        if dest.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("collection '{to}' already exists"),
            )
            .into());
        }
        fs::rename(source, dest)?;
        Ok(())
    }

    fn load_tasks(&self, container: &str) -> Result<Vec<TaskRecord>> {
        let dir = self.collection_dir(container);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for path in document_paths(&dir)? {
            let data = fs::read_to_string(path)?;
            tasks.push(serde_json::from_str(&data)?);
        }
        Ok(tasks)
    }

    fn list_indexes(&self, container: &str) -> Result<Vec<String>> {
        if !self.collection_dir(container).is_dir() {
            return Ok(Vec::new());
        }
        Ok(self.read_catalog(container)?.into_keys().collect())
    }
}

fn stage<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Move staged files into place in order. On the first failure every file
/// already moved is removed again.
fn commit_staged(moves: &[(PathBuf, PathBuf)]) -> std::result::Result<usize, Vec<String>> {
    for (done, (staged, dest)) in moves.iter().enumerate() {
        if let Err(err) = fs::rename(staged, dest) {
            let mut errors = vec![format!("{}: {err}", dest.display())];
            for (_, moved) in &moves[..done] {
                if let Err(rollback_err) = fs::remove_file(moved) {
                    errors.push(format!(
                        "rollback of {} failed: {rollback_err}",
                        moved.display()
                    ));
                }
            }
            return Err(errors);
        }
    }
    Ok(moves.len())
}

/// Document files in a collection, sorted by name. Catalog and hidden files
/// are not documents.
fn document_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('_') || name.starts_with('.') {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn legacy_from_document(doc: &Value, fallback_id: Option<String>) -> LegacyRow {
    let id = doc
        .get("_id")
        .or_else(|| doc.get("id"))
        .and_then(scalar_text)
        .or(fallback_id);
    let id_ref = id.as_deref();

    let Some(obj) = doc.as_object() else {
        return Err(RecordError::new(id_ref, "document", "not a JSON object"));
    };

    let user_id = match obj.get("user_id") {
        Some(Value::Number(n)) if n.is_i64() => n.as_i64().map(UserRef::Int),
        Some(other) => scalar_text(other).map(UserRef::Text),
        None => None,
    }
    .ok_or_else(|| RecordError::new(id_ref, "user_id", "missing or not a scalar"))?;

    let task_detail = obj
        .get("task_detail")
        .and_then(Value::as_str)
        .ok_or_else(|| RecordError::new(id_ref, "task_detail", "missing or not a string"))?
        .to_string();

    let time = |field: &str| {
        obj.get(field)
            .and_then(legacy_time)
            .ok_or_else(|| RecordError::new(id_ref, field, "missing or not a timestamp"))
    };

    Ok(LegacyTaskRecord {
        creation_time: time("creation_time")?,
        lastedited_time: time("lastedited_time")?,
        due_time: time("due_time")?,
        id,
        user_id,
        task_detail,
    })
}

/// Text form of a scalar or an extended-JSON `{"$oid": ..}` wrapper.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn legacy_time(value: &Value) -> Option<LegacyTime> {
    match value {
        Value::String(s) => Some(LegacyTime::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(LegacyTime::Millis),
        Value::Object(map) => map.get("$date").and_then(legacy_time),
        _ => None,
    }
}
