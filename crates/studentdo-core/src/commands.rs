use anyhow::{Context, anyhow};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::cli::{Command, EditFields, PrefsCommand, Theme};
use crate::config::Config;
use crate::datetime::parse_date_expr;
use crate::render::Renderer;
use crate::view_state::TaskViewState;

#[instrument(skip_all)]
pub async fn dispatch(
    view: &TaskViewState,
    cfg: &Config,
    command: Command,
) -> anyhow::Result<()> {
    let prefs = *view.preferences().borrow();
    let mut renderer = Renderer::new(cfg, &prefs);

    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            title,
            description,
            due,
            priority,
        } => cmd_add(view, title, description, &due, priority).await,
        Command::List => cmd_list(view, &renderer),
        Command::Show { id } => cmd_show(view, &renderer, id).await,
        Command::Edit { id, fields } => cmd_edit(view, id, fields).await,
        Command::Done { id } => cmd_done(view, id).await,
        Command::Delete { id } => cmd_delete(view, id).await,
        Command::Bin => renderer.print_recycle_bin(&view.deleted_tasks().borrow()),
        Command::Restore { id } => cmd_restore(view, id).await,
        Command::Purge { id } => cmd_purge(view, id).await,
        Command::Prefs { change } => cmd_prefs(view, &renderer, change).await,
        Command::Watch => cmd_watch(view, &mut renderer).await,
    }
}

/// Presentation-boundary validation: the core accepts empty text, the
/// app does not.
fn require_text(value: &str, field: &str) -> anyhow::Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{field} cannot be empty"));
    }
    Ok(())
}

#[instrument(skip(view, title, description))]
async fn cmd_add(
    view: &TaskViewState,
    title: String,
    description: String,
    due: &str,
    priority: i64,
) -> anyhow::Result<()> {
    require_text(&title, "Title")?;
    require_text(&description, "Description")?;
    let due = parse_date_expr(due, Utc::now())?;

    let id = view
        .add_task(title, description, due, priority)
        .await
        .context("failed to add task")?;
    info!(id, "task added");
    println!("Created task {id}.");
    Ok(())
}

fn cmd_list(view: &TaskViewState, renderer: &Renderer) -> anyhow::Result<()> {
    let tasks = view.derived_tasks().borrow().clone();
    renderer.print_task_table(&tasks, Utc::now())
}

async fn cmd_show(view: &TaskViewState, renderer: &Renderer, id: u64) -> anyhow::Result<()> {
    let task = view
        .get_task_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    renderer.print_task_info(&task)
}

#[instrument(skip(view, fields))]
async fn cmd_edit(view: &TaskViewState, id: u64, fields: EditFields) -> anyhow::Result<()> {
    let mut task = view
        .get_task_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("no task with id {id}"))?;

    if let Some(title) = fields.title {
        require_text(&title, "Title")?;
        task.title = title;
    }
    if let Some(description) = fields.description {
        require_text(&description, "Description")?;
        task.description = description;
    }
    if let Some(due) = fields.due {
        task.due = parse_date_expr(&due, Utc::now())?;
    }
    if let Some(priority) = fields.priority {
        task.priority = priority;
    }

    view.update_task(task)
        .await
        .with_context(|| format!("failed to update task {id}"))?;
    println!("Modified task {id}.");
    Ok(())
}

async fn cmd_done(view: &TaskViewState, id: u64) -> anyhow::Result<()> {
    let task = view
        .get_task_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    let now_completed = !task.completed;
    view.toggle_completed(task).await?;
    if now_completed {
        println!("Completed task {id}.");
    } else {
        println!("Reopened task {id}.");
    }
    Ok(())
}

async fn cmd_delete(view: &TaskViewState, id: u64) -> anyhow::Result<()> {
    let task = view
        .get_task_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    let deleted = view.delete_task(task).await?;
    println!("Moved task {} to the recycle bin.", deleted.id);
    Ok(())
}

async fn cmd_restore(view: &TaskViewState, id: u64) -> anyhow::Result<()> {
    let deleted = view
        .get_deleted_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("no recycle bin entry with id {id}"))?;
    view.restore_task(deleted).await?;
    println!("Restored task {id}.");
    Ok(())
}

async fn cmd_purge(view: &TaskViewState, id: u64) -> anyhow::Result<()> {
    let deleted = view
        .get_deleted_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("no recycle bin entry with id {id}"))?;
    view.permanently_delete_task(deleted).await?;
    println!("Permanently deleted task {id}.");
    Ok(())
}

async fn cmd_prefs(
    view: &TaskViewState,
    renderer: &Renderer,
    change: Option<PrefsCommand>,
) -> anyhow::Result<()> {
    match change {
        None => renderer.print_preferences(&view.preferences().borrow()),
        Some(PrefsCommand::Theme { theme }) => {
            view.update_dark_theme(theme == Theme::Dark).await?;
            println!("Theme set to {}.", if theme == Theme::Dark { "dark" } else { "light" });
            Ok(())
        }
        Some(PrefsCommand::Sort { order }) => {
            view.update_sort_order(order).await?;
            println!("Sorting by {order}.");
            Ok(())
        }
        Some(PrefsCommand::Filter { filter }) => {
            view.update_priority_filter(filter).await?;
            println!("Showing {filter} priority tasks.");
            Ok(())
        }
    }
}

/// Reprints the derived list on every emission until Ctrl-C.
async fn cmd_watch(view: &TaskViewState, renderer: &mut Renderer) -> anyhow::Result<()> {
    let mut tasks_rx = view.derived_tasks();
    let mut prefs_rx = view.preferences();

    loop {
        let tasks = tasks_rx.borrow_and_update().clone();
        renderer.set_dark_theme(prefs_rx.borrow_and_update().dark_theme);
        renderer.print_task_table(&tasks, Utc::now())?;
        println!();

        tokio::select! {
            changed = tasks_rx.changed() => {
                changed.context("task list closed")?;
            }
            changed = prefs_rx.changed() => {
                changed.context("preferences closed")?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                debug!("watch interrupted");
                return Ok(());
            }
        }
    }
}
