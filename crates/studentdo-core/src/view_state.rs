use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::derive::derive_task_list;
use crate::error::{Result, StoreError};
use crate::prefs::{PriorityFilter, SortOrder, UserPreferences};
use crate::repository::{PreferencesRepository, TaskRepository};
use crate::task::{DeletedTask, Priority, Task};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Pending result of an intent. Awaiting it is optional: dropping the handle
/// leaves the mutation running.
#[must_use = "drop the intent explicitly to ignore its outcome"]
#[derive(Debug)]
pub struct Intent<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Intent<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(StoreError::Cancelled)))
    }
}

/// Bridges the repositories to a presentation layer.
///
/// Holds the derived task list as a live value recomputed from the latest
/// task list and the latest preferences whenever either changes. Intents
/// are queued to a single worker, so they apply in the order they were
/// issued. Dropping the controller stops the derived list and closes the
/// queue; intents already queued still run and report their real outcome.
pub struct TaskViewState {
    tasks: TaskRepository,
    prefs: PreferencesRepository,
    derived_rx: watch::Receiver<Vec<Task>>,
    prefs_rx: watch::Receiver<UserPreferences>,
    jobs: mpsc::UnboundedSender<Job>,
    combinator: JoinHandle<()>,
}

impl TaskViewState {
    /// Must be called from within a tokio runtime.
    pub fn new(tasks: TaskRepository, prefs: PreferencesRepository) -> Self {
        let mut tasks_rx = tasks.observe_all();
        let mut upstream_prefs = prefs.observe();
        let prefs_rx = upstream_prefs.clone();

        let initial = derive_task_list(
            &tasks_rx.borrow_and_update(),
            &upstream_prefs.borrow_and_update(),
        );
        let (derived_tx, derived_rx) = watch::channel(initial);

        let combinator = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        changed = tasks_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        changed = upstream_prefs.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    let derived = derive_task_list(
                        &tasks_rx.borrow_and_update(),
                        &upstream_prefs.borrow_and_update(),
                    );
                    debug!(count = derived.len(), "derived list recomputed");
                    derived_tx.send_replace(derived);
                }
                debug!("upstream closed; combinator stopped");
            }
            .instrument(info_span!("derived_task_list")),
        );

        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                job.await;
            }
            debug!("intent queue drained");
        });

        Self {
            tasks,
            prefs,
            derived_rx,
            prefs_rx,
            jobs,
            combinator,
        }
    }

    /// Filtered, sorted list for display.
    pub fn derived_tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.derived_rx.clone()
    }

    pub fn preferences(&self) -> watch::Receiver<UserPreferences> {
        self.prefs_rx.clone()
    }

    pub fn deleted_tasks(&self) -> watch::Receiver<Vec<DeletedTask>> {
        self.tasks.observe_deleted()
    }

    pub async fn get_task_by_id(&self, id: u64) -> Result<Option<Task>> {
        self.tasks.get_by_id(id).await
    }

    pub async fn get_deleted_by_id(&self, id: u64) -> Result<Option<DeletedTask>> {
        self.tasks.get_deleted_by_id(id).await
    }

    pub fn add_task(
        &self,
        title: String,
        description: String,
        due: DateTime<Utc>,
        priority: i64,
    ) -> Intent<u64> {
        let repo = self.tasks.clone();
        self.dispatch("add_task", async move {
            ensure_priority(priority)?;
            repo.insert(Task::new(title, description, due, priority))
                .await
        })
    }

    pub fn update_task(&self, task: Task) -> Intent<()> {
        let repo = self.tasks.clone();
        self.dispatch("update_task", async move {
            ensure_priority(task.priority)?;
            repo.update(task).await
        })
    }

    /// Moves the task to the recycle bin.
    pub fn delete_task(&self, task: Task) -> Intent<DeletedTask> {
        let repo = self.tasks.clone();
        self.dispatch("delete_task", async move {
            repo.move_to_recycle_bin(task).await
        })
    }

    pub fn restore_task(&self, deleted: DeletedTask) -> Intent<Task> {
        let repo = self.tasks.clone();
        self.dispatch("restore_task", async move {
            repo.restore_from_recycle_bin(deleted).await
        })
    }

    pub fn permanently_delete_task(&self, deleted: DeletedTask) -> Intent<()> {
        let repo = self.tasks.clone();
        self.dispatch("permanently_delete_task", async move {
            repo.permanently_delete(deleted.id).await
        })
    }

    pub fn toggle_completed(&self, task: Task) -> Intent<()> {
        let repo = self.tasks.clone();
        self.dispatch("toggle_completed", async move {
            repo.update(task.toggled()).await
        })
    }

    pub fn update_dark_theme(&self, dark: bool) -> Intent<()> {
        let prefs = self.prefs.clone();
        self.dispatch("update_dark_theme", async move {
            prefs.set_dark_theme(dark).await
        })
    }

    pub fn update_sort_order(&self, order: SortOrder) -> Intent<()> {
        let prefs = self.prefs.clone();
        self.dispatch("update_sort_order", async move {
            prefs.set_sort_order(order).await
        })
    }

    pub fn update_priority_filter(&self, filter: PriorityFilter) -> Intent<()> {
        let prefs = self.prefs.clone();
        self.dispatch("update_priority_filter", async move {
            prefs.set_priority_filter(filter).await
        })
    }

    fn dispatch<T, F>(&self, name: &'static str, op: F) -> Intent<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(
            async move {
                let result = op.await;
                if let Err(err) = &result {
                    warn!(error = %err, "intent failed");
                }
                let _ = tx.send(result);
            }
            .instrument(info_span!("intent", name)),
        );

        // A closed queue drops the job and its sender, which resolves the
        // intent as cancelled.
        if self.jobs.send(job).is_err() {
            warn!(intent = name, "intent queue closed");
        }
        Intent { rx }
    }
}

impl Drop for TaskViewState {
    fn drop(&mut self) {
        self.combinator.abort();
    }
}

/// Only Low, Medium and High are accepted on the way in.
fn ensure_priority(priority: i64) -> Result<()> {
    Priority::from_level(priority)
        .map(|_| ())
        .ok_or(StoreError::InvalidPriority(priority))
}
