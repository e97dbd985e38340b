use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::storage::{Storage, StorageError};
use crate::task::{Task, TaskForm, ValidationError};

pub const DEFAULT_STORAGE_KEY: &str = "tasks";
pub const SCHEMA_VERSION: u32 = 1;

const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to serialize tasks: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unreadable tasks under '{key}' have no backup; refusing to overwrite them")]
    UnprotectedData { key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What `TaskStore::open` found under its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Empty,
    Restored { count: usize, version: u32 },
    Recovered { reason: String },
}

#[derive(Debug, Serialize)]
struct PersistedRef<'a> {
    version: u32,
    tasks: &'a [Task],
}

#[derive(Debug, Deserialize)]
struct Persisted {
    version: u32,
    tasks: Vec<Task>,
}

/// Owner of the task collection. Every mutation is written through to storage
/// before it becomes visible; a failed write leaves the collection untouched.
#[derive(Debug)]
pub struct TaskStore<S: Storage> {
    storage: S,
    key: String,
    tasks: Vec<Task>,
    outcome: LoadOutcome,
    // Set when an unreadable payload could not be copied aside; writes stay off until then.
    unprotected: bool,
}

impl<S: Storage> TaskStore<S> {
    #[tracing::instrument(skip(storage))]
    pub fn open(mut storage: S, key: &str) -> StoreResult<Self> {
        let raw = storage.get(key)?;

        let mut unprotected = false;
        let (tasks, outcome) = match raw {
            None => (vec![], LoadOutcome::Empty),
            Some(raw) if raw.trim().is_empty() => (vec![], LoadOutcome::Empty),
            Some(raw) => match decode(&raw) {
                Ok((tasks, version)) => {
                    let count = tasks.len();
                    (tasks, LoadOutcome::Restored { count, version })
                }
                Err(reason) => {
                    warn!(key, reason = %reason, "stored tasks unreadable; starting empty");
                    let backup = format!("{key}{CORRUPT_SUFFIX}");
                    if let Err(err) = storage.set(&backup, &raw) {
                        warn!(key = %backup, error = %err, "failed to keep unreadable payload; writes disabled");
                        unprotected = true;
                    }
                    (vec![], LoadOutcome::Recovered { reason })
                }
            },
        };

        info!(key, count = tasks.len(), outcome = ?outcome, "opened task store");

        Ok(Self {
            storage,
            key: key.to_string(),
            tasks,
            outcome,
            unprotected,
        })
    }

    /// Hands the backend back. Nothing is written: every mutation is already durable.
    pub fn close(self) -> S {
        debug!(key = %self.key, count = self.tasks.len(), "closing task store");
        self.storage
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The persisted document for the current collection.
    pub fn to_json(&self) -> StoreResult<String> {
        encode(&self.tasks)
    }

    /// Rewrites the stored document from memory, e.g. to upgrade a legacy payload.
    #[tracing::instrument(skip(self))]
    pub fn flush(&mut self) -> StoreResult<()> {
        self.ensure_writable()?;
        let payload = encode(&self.tasks)?;
        self.storage.set(&self.key, &payload)?;
        debug!(count = self.tasks.len(), "flushed tasks");
        Ok(())
    }

    #[tracing::instrument(skip(self, form, now), fields(title = %form.title))]
    pub fn add_task(&mut self, form: TaskForm, now: DateTime<Utc>) -> StoreResult<Task> {
        form.validate()?;

        let mut id = Uuid::new_v4();
        while self.get(id).is_some() {
            id = Uuid::new_v4();
        }
        let task = Task::from_form(id, form, now);

        let mut next = self.tasks.clone();
        next.push(task.clone());
        self.commit(next)?;

        info!(id = %task.id, count = self.tasks.len(), "task added");
        Ok(task)
    }

    #[tracing::instrument(skip(self, form), fields(id = %id))]
    pub fn update_task(&mut self, id: Uuid, form: TaskForm) -> StoreResult<Task> {
        let idx = self.position(id)?;
        form.validate()?;

        let mut next = self.tasks.clone();
        next[idx].apply_form(form);
        let updated = next[idx].clone();
        self.commit(next)?;

        info!("task updated");
        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn delete_task(&mut self, id: Uuid) -> StoreResult<Task> {
        let idx = self.position(id)?;

        let mut next = self.tasks.clone();
        let removed = next.remove(idx);
        self.commit(next)?;

        info!(count = self.tasks.len(), "task deleted");
        Ok(removed)
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn toggle_task_completion(&mut self, id: Uuid) -> StoreResult<Task> {
        let idx = self.position(id)?;

        let mut next = self.tasks.clone();
        next[idx].completed = !next[idx].completed;
        let toggled = next[idx].clone();
        self.commit(next)?;

        info!(completed = toggled.completed, "task completion toggled");
        Ok(toggled)
    }

    fn position(&self, id: Uuid) -> StoreResult<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.unprotected {
            return Err(StoreError::UnprotectedData { key: self.key.clone() });
        }
        Ok(())
    }

    fn commit(&mut self, next: Vec<Task>) -> StoreResult<()> {
        self.ensure_writable()?;
        let payload = encode(&next)?;
        if let Err(err) = self.storage.set(&self.key, &payload) {
            warn!(key = %self.key, error = %err, "write-through failed; keeping previous tasks");
            return Err(err.into());
        }
        self.tasks = next;
        Ok(())
    }
}

fn encode(tasks: &[Task]) -> StoreResult<String> {
    Ok(serde_json::to_string(&PersistedRef {
        version: SCHEMA_VERSION,
        tasks,
    })?)
}

/// Accepts the versioned envelope or a bare array of task records.
fn decode(raw: &str) -> Result<(Vec<Task>, u32), String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;

    let (tasks, version) = match value {
        Value::Array(_) => {
            let tasks: Vec<Task> =
                serde_json::from_value(value).map_err(|e| format!("invalid task record: {e}"))?;
            (tasks, 0)
        }
        Value::Object(_) => {
            let doc: Persisted =
                serde_json::from_value(value).map_err(|e| format!("invalid task document: {e}"))?;
            if doc.version > SCHEMA_VERSION {
                return Err(format!(
                    "unsupported schema version {} (newest known is {SCHEMA_VERSION})",
                    doc.version
                ));
            }
            (doc.tasks, doc.version)
        }
        other => return Err(format!("expected a task list, found {other}")),
    };

    let mut seen = std::collections::HashSet::with_capacity(tasks.len());
    if let Some(dup) = tasks.iter().find(|t| !seen.insert(t.id)) {
        return Err(format!("duplicate task id {}", dup.id));
    }

    Ok((tasks, version))
}
