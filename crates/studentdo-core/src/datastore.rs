use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::task::{DeletedTask, Task};

const TASKS_FILE: &str = "tasks.data";
const DELETED_FILE: &str = "deleted_tasks.data";
const META_FILE: &str = "meta.json";
const JOURNAL_FILE: &str = "journal.json";
const STAGED_SUFFIX: &str = ".staged";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct Meta {
    next_id: u64,
}

impl Default for Meta {
    fn default() -> Self {
        Self { next_id: 1 }
    }
}

/// Files staged by a commit that still have to be renamed into place.
#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    files: Vec<String>,
}

/// In-memory view of both tables, handed to [`DataStore::transaction`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    meta: Meta,
    tasks: Vec<Task>,
    deleted: Vec<DeletedTask>,
}

impl Tables {
    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == Some(id))
    }

    pub fn deleted(&self, id: u64) -> Option<&DeletedTask> {
        self.deleted.iter().find(|t| t.id == id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn deleted_tasks(&self) -> &[DeletedTask] {
        &self.deleted
    }

    /// Inserts or replaces a task. Tasks without an id get the next one
    /// from the monotonic counter; explicit ids push the counter past them.
    /// An id held by a recycle bin entry cannot be reused.
    pub fn upsert_task(&mut self, mut task: Task) -> Result<u64> {
        task.due = to_millis(task.due);
        let id = match task.id {
            Some(id) => id,
            None => {
                let id = self.meta.next_id;
                task.id = Some(id);
                id
            }
        };
        if self.deleted(id).is_some() {
            return Err(StoreError::IdInRecycleBin(id));
        }
        let after = id.checked_add(1).ok_or(StoreError::IdExhausted)?;
        self.meta.next_id = self.meta.next_id.max(after);

        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == Some(id)) {
            *slot = task;
        } else {
            self.tasks.push(task);
        }
        Ok(id)
    }

    pub fn replace_task(&mut self, mut task: Task) -> Result<()> {
        task.due = to_millis(task.due);
        let id = task.id.ok_or(StoreError::MissingId)?;
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == Some(id))
            .ok_or(StoreError::NotFound(id))?;
        *slot = task;
        Ok(())
    }

    pub fn remove_task(&mut self, id: u64) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.id == Some(id))?;
        Some(self.tasks.remove(idx))
    }

    pub fn upsert_deleted(&mut self, mut deleted: DeletedTask) {
        deleted.due = to_millis(deleted.due);
        deleted.deleted_at = to_millis(deleted.deleted_at);
        if let Some(slot) = self.deleted.iter_mut().find(|t| t.id == deleted.id) {
            *slot = deleted;
        } else {
            self.deleted.push(deleted);
        }
    }

    pub fn remove_deleted(&mut self, id: u64) -> Option<DeletedTask> {
        let idx = self.deleted.iter().position(|t| t.id == id)?;
        Some(self.deleted.remove(idx))
    }
}

/// File-backed store for the `tasks` and `deleted_tasks` tables.
///
/// Each table is a JSON-lines file. A commit stages every changed file next
/// to its target, records the staged set in a journal, then renames them into
/// place, so a crash mid-commit is rolled forward on the next [`open`].
/// Committed tables are published on watch channels: tasks ordered by due
/// date, deleted tasks in storage order.
///
/// [`open`]: DataStore::open
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub deleted_path: PathBuf,
    meta_path: PathBuf,
    journal_path: PathBuf,
    tables: Mutex<Tables>,
    tasks_tx: watch::Sender<Vec<Task>>,
    deleted_tx: watch::Sender<Vec<DeletedTask>>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|err| StoreError::io(&data_dir, err))?;

        let tasks_path = data_dir.join(TASKS_FILE);
        let deleted_path = data_dir.join(DELETED_FILE);
        let meta_path = data_dir.join(META_FILE);
        let journal_path = data_dir.join(JOURNAL_FILE);

        recover(&data_dir, &journal_path)?;

        for path in [&tasks_path, &deleted_path] {
            if !path.exists() {
                fs::write(path, "").map_err(|err| StoreError::io(path, err))?;
            }
        }

        let tasks: Vec<Task> = load_jsonl(&tasks_path)?;
        let deleted: Vec<DeletedTask> = load_jsonl(&deleted_path)?;
        let mut meta = load_meta(&meta_path)?;

        // A lost or stale meta file must never hand out an id still in use.
        let max_id = tasks
            .iter()
            .filter_map(|t| t.id)
            .chain(deleted.iter().map(|t| t.id))
            .max()
            .unwrap_or(0);
        let after = max_id.checked_add(1).ok_or(StoreError::IdExhausted)?;
        meta.next_id = meta.next_id.max(after);

        info!(
            data_dir = %data_dir.display(),
            tasks = tasks.len(),
            deleted = deleted.len(),
            next_id = meta.next_id,
            "opened datastore"
        );

        let (tasks_tx, _) = watch::channel(by_due_date(&tasks));
        let (deleted_tx, _) = watch::channel(deleted.clone());

        Ok(Self {
            data_dir,
            tasks_path,
            deleted_path,
            meta_path,
            journal_path,
            tables: Mutex::new(Tables {
                meta,
                tasks,
                deleted,
            }),
            tasks_tx,
            deleted_tx,
        })
    }

    /// Live query over `tasks`, ascending by due date. Re-emits the full
    /// list after every commit that changed the table.
    pub fn subscribe_tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks_tx.subscribe()
    }

    /// Live query over `deleted_tasks`, in storage order.
    pub fn subscribe_deleted(&self) -> watch::Receiver<Vec<DeletedTask>> {
        self.deleted_tx.subscribe()
    }

    pub fn snapshot(&self) -> Tables {
        self.tables.lock().clone()
    }

    pub fn read<T>(&self, op: impl FnOnce(&Tables) -> T) -> T {
        op(&self.tables.lock())
    }

    /// Runs `op` against a copy of the tables and commits the result as one
    /// unit. Nothing is written or published when `op` fails.
    #[tracing::instrument(skip(self, op))]
    pub fn transaction<T>(&self, op: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.lock();
        let mut working = guard.clone();
        let out = op(&mut working)?;

        let tasks_changed = working.tasks != guard.tasks;
        let deleted_changed = working.deleted != guard.deleted;
        let meta_changed = working.meta != guard.meta;

        let mut staged = Vec::new();
        if tasks_changed {
            stage_jsonl(&self.tasks_path, &working.tasks)?;
            staged.push(TASKS_FILE.to_string());
        }
        if deleted_changed {
            stage_jsonl(&self.deleted_path, &working.deleted)?;
            staged.push(DELETED_FILE.to_string());
        }
        if meta_changed {
            stage_json(&self.meta_path, &working.meta)?;
            staged.push(META_FILE.to_string());
        }

        if staged.is_empty() {
            debug!("transaction made no changes");
            return Ok(out);
        }

        let journal = Journal { files: staged };
        write_json_atomic(&self.journal_path, &journal)?;
        apply_journal(&self.data_dir, &self.journal_path, &journal)?;

        *guard = working;
        if tasks_changed {
            self.tasks_tx.send_replace(by_due_date(&guard.tasks));
        }
        if deleted_changed {
            self.deleted_tx.send_replace(guard.deleted.clone());
        }

        debug!(
            tasks_changed,
            deleted_changed,
            meta_changed,
            "transaction committed"
        );
        Ok(out)
    }
}

/// Rows hold epoch milliseconds; finer precision would not survive a reload.
fn to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(3)
}

fn by_due_date(tasks: &[Task]) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by_key(|t| t.due);
    sorted
}

fn staged_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(STAGED_SUFFIX);
    PathBuf::from(name)
}

#[tracing::instrument(skip(data_dir, journal_path))]
fn recover(data_dir: &Path, journal_path: &Path) -> Result<()> {
    if journal_path.exists() {
        let raw =
            fs::read_to_string(journal_path).map_err(|err| StoreError::io(journal_path, err))?;
        let journal: Journal = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: journal_path.to_path_buf(),
            line: 1,
            source,
        })?;
        warn!(files = ?journal.files, "rolling forward interrupted commit");
        apply_journal(data_dir, journal_path, &journal)?;
    }

    // Staged files without a journal belong to a commit that never happened.
    for name in [TASKS_FILE, DELETED_FILE, META_FILE] {
        let leftover = staged_path(&data_dir.join(name));
        if leftover.exists() {
            warn!(file = %leftover.display(), "discarding uncommitted staged file");
            fs::remove_file(&leftover).map_err(|err| StoreError::io(&leftover, err))?;
        }
    }
    Ok(())
}

fn apply_journal(data_dir: &Path, journal_path: &Path, journal: &Journal) -> Result<()> {
    for name in &journal.files {
        let target = data_dir.join(name);
        let staged = staged_path(&target);
        if staged.exists() {
            fs::rename(&staged, &target).map_err(|err| StoreError::io(&target, err))?;
        }
    }
    fs::remove_file(journal_path).map_err(|err| StoreError::io(journal_path, err))?;
    Ok(())
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path).map_err(|err| StoreError::io(path, err))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| StoreError::io(path, err))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record = serde_json::from_str(trimmed).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

fn load_meta(path: &Path) -> Result<Meta> {
    if !path.exists() {
        return Ok(Meta::default());
    }
    let raw = fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        line: 1,
        source,
    })
}

#[tracing::instrument(skip(target, records))]
fn stage_jsonl<T: Serialize>(target: &Path, records: &[T]) -> Result<()> {
    debug!(file = %target.display(), count = records.len(), "staging jsonl");
    let mut temp = temp_beside(target)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}").map_err(|err| StoreError::io(target, err))?;
    }
    persist(temp, &staged_path(target))
}

fn stage_json<T: Serialize>(target: &Path, value: &T) -> Result<()> {
    let mut temp = temp_beside(target)?;
    serde_json::to_writer(&mut temp, value)?;
    persist(temp, &staged_path(target))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut temp = temp_beside(path)?;
    serde_json::to_writer(&mut temp, value)?;
    persist(temp, path)
}

fn temp_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))
}

fn persist(mut temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.flush().map_err(|err| StoreError::io(path, err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| StoreError::io(path, err))?;
    temp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}
