use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::datastore::DataStore;
use crate::error::{Result, StoreError};
use crate::prefs::{
    DARK_THEME_KEY, PRIORITY_FILTER_KEY, PriorityFilter, SORT_ORDER_KEY, SortOrder,
    UserPreferences,
};
use crate::settings::{SettingValue, SettingsStore};
use crate::task::{DeletedTask, Task};

/// Typed operations over the task tables. Storage work runs on the blocking
/// pool so callers on the async runtime are never stalled.
#[derive(Debug, Clone)]
pub struct TaskRepository {
    store: Arc<DataStore>,
}

impl TaskRepository {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    /// Active tasks ascending by due date, re-emitted in full on change.
    pub fn observe_all(&self) -> watch::Receiver<Vec<Task>> {
        self.store.subscribe_tasks()
    }

    /// Recycle bin contents in storage order.
    pub fn observe_deleted(&self) -> watch::Receiver<Vec<DeletedTask>> {
        self.store.subscribe_deleted()
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_id(&self, id: u64) -> Result<Option<Task>> {
        self.blocking(move |store| Ok(store.read(|tables| tables.task(id).cloned())))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_deleted_by_id(&self, id: u64) -> Result<Option<DeletedTask>> {
        self.blocking(move |store| Ok(store.read(|tables| tables.deleted(id).cloned())))
            .await
    }

    /// Stores `task`, assigning a fresh id when it has none. A task carrying
    /// an existing id replaces that row.
    #[tracing::instrument(skip(self, task), fields(id = ?task.id))]
    pub async fn insert(&self, task: Task) -> Result<u64> {
        let id = self
            .blocking(move |store| store.transaction(|tables| tables.upsert_task(task)))
            .await?;
        debug!(id, "task inserted");
        Ok(id)
    }

    #[tracing::instrument(skip(self, task), fields(id = ?task.id))]
    pub async fn update(&self, task: Task) -> Result<()> {
        self.blocking(move |store| store.transaction(|tables| tables.replace_task(task)))
            .await
    }

    /// Snapshots the task into the recycle bin and removes it from the active
    /// table in one commit.
    #[tracing::instrument(skip(self, task), fields(id = ?task.id))]
    pub async fn move_to_recycle_bin(&self, task: Task) -> Result<DeletedTask> {
        let id = task.id.ok_or(StoreError::MissingId)?;
        let deleted = self
            .blocking(move |store| {
                store.transaction(|tables| {
                    if tables.task(id).is_none() {
                        return Err(StoreError::NotFound(id));
                    }
                    tables.upsert_deleted(DeletedTask::from_task(&task, id, Utc::now()));
                    tables.remove_task(id);
                    tables.deleted(id).cloned().ok_or(StoreError::NotFound(id))
                })
            })
            .await?;
        info!(id, "task moved to recycle bin");
        Ok(deleted)
    }

    /// Re-inserts the task under its original id and drops the bin entry in
    /// one commit.
    #[tracing::instrument(skip(self, deleted), fields(id = deleted.id))]
    pub async fn restore_from_recycle_bin(&self, deleted: DeletedTask) -> Result<Task> {
        let id = deleted.id;
        let task = self
            .blocking(move |store| {
                store.transaction(|tables| {
                    if tables.remove_deleted(id).is_none() {
                        return Err(StoreError::NotFound(id));
                    }
                    tables.upsert_task(deleted.restored())?;
                    tables.task(id).cloned().ok_or(StoreError::NotFound(id))
                })
            })
            .await?;
        info!(id, "task restored from recycle bin");
        Ok(task)
    }

    /// Removes the bin entry only; the active row is already gone.
    #[tracing::instrument(skip(self))]
    pub async fn permanently_delete(&self, id: u64) -> Result<()> {
        self.blocking(move |store| {
            store.transaction(|tables| {
                tables
                    .remove_deleted(id)
                    .map(|_| ())
                    .ok_or(StoreError::NotFound(id))
            })
        })
        .await?;
        info!(id, "task permanently deleted");
        Ok(())
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DataStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store)).await?
    }
}

/// Typed view of the settings store.
#[derive(Debug, Clone)]
pub struct PreferencesRepository {
    store: Arc<SettingsStore>,
}

impl PreferencesRepository {
    pub fn new(store: Arc<SettingsStore>) -> Self {
        Self { store }
    }

    pub fn current(&self) -> UserPreferences {
        UserPreferences::from_settings(&self.store.snapshot())
    }

    /// Live preferences. The forwarding task ends once every receiver is
    /// dropped. Must be called from within a tokio runtime.
    pub fn observe(&self) -> watch::Receiver<UserPreferences> {
        let mut upstream = self.store.subscribe();
        let initial = UserPreferences::from_settings(&upstream.borrow_and_update());
        let (tx, rx) = watch::channel(initial);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = upstream.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let prefs = UserPreferences::from_settings(&upstream.borrow_and_update());
                        tx.send_if_modified(|current| {
                            if *current == prefs {
                                return false;
                            }
                            *current = prefs;
                            true
                        });
                    }
                    () = tx.closed() => break,
                }
            }
            debug!("preferences subscription closed");
        });

        rx
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_dark_theme(&self, dark: bool) -> Result<()> {
        self.set(DARK_THEME_KEY, dark.into()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_sort_order(&self, order: SortOrder) -> Result<()> {
        self.set(SORT_ORDER_KEY, order.as_key().into()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_priority_filter(&self, filter: PriorityFilter) -> Result<()> {
        self.set(PRIORITY_FILTER_KEY, filter.as_raw().into()).await
    }

    async fn set(&self, key: &'static str, value: SettingValue) -> Result<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.set(key, value)).await?
    }
}
