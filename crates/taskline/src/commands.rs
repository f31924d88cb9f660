//! Subcommand implementations.
//!
//! Each command writes its human-readable output to `out` so it can be
//! exercised without a terminal.

use std::io::Write;

use miette::Result;
use taskline_core::{FilterSpec, MutationKind, Priority, Task, TaskError, TaskId, TaskService, TaskStats};
use tracing::warn;

/// One line per task: completion box, priority, text, id.
pub fn format_task(task: &Task) -> String {
    let mark = if task.completed { 'x' } else { ' ' };
    format!("[{}] {:<6} {}  ({})", mark, task.priority, task.text, task.id)
}

pub fn format_stats(stats: &TaskStats) -> String {
    format!(
        "Total: {}  Completed: {}  Pending: {}",
        stats.total, stats.completed, stats.pending
    )
}

fn write_line(out: &mut impl Write, line: &str) -> Result<()> {
    writeln!(out, "{}", line).map_err(|e| miette::miette!("failed to write output: {}", e))
}

/// Error for a failed mutation, in the form shown to users.
fn mutation_error(kind: MutationKind, err: TaskError) -> miette::Report {
    match err {
        TaskError::Validation(_) => miette::miette!("{}", err),
        _ => miette::miette!("{}", kind.failure_message(&err)),
    }
}

/// Load the base list so mutations can find their targets.
async fn preload(service: &TaskService) {
    if let Err(e) = service.fetch_tasks(&FilterSpec::base()).await {
        warn!(error = %e, "could not load tasks");
    }
}

pub async fn list(service: &TaskService, spec: FilterSpec, out: &mut impl Write) -> Result<()> {
    let query = service.list_tasks(spec).await;
    let state = query.state();

    let tasks = match (state.data, state.error) {
        (Some(tasks), _) => tasks,
        (None, Some(e)) => return Err(miette::miette!("failed to load tasks: {}", e)),
        (None, None) => Vec::new(),
    };

    if tasks.is_empty() {
        return write_line(out, "No tasks");
    }
    for task in &tasks {
        write_line(out, &format_task(task))?;
    }
    Ok(())
}

pub async fn add(service: &TaskService, text: &str, priority: Priority, out: &mut impl Write) -> Result<()> {
    let task = service
        .add_task(text, priority)
        .await
        .map_err(|e| mutation_error(MutationKind::Add, e))?;
    write_line(out, &format!("Added {}", format_task(&task)))
}

pub async fn toggle(service: &TaskService, id: &TaskId, out: &mut impl Write) -> Result<()> {
    preload(service).await;
    let task = service
        .toggle_task(id)
        .await
        .map_err(|e| mutation_error(MutationKind::Toggle, e))?;
    write_line(out, &format_task(&task))
}

pub async fn delete(service: &TaskService, id: &TaskId, out: &mut impl Write) -> Result<()> {
    preload(service).await;
    match service.delete_task(id).await {
        Ok(()) => write_line(out, &format!("Deleted {}", id)),
        Err(e) if e.is_not_found() => write_line(out, &format!("Task {} was already deleted", id)),
        Err(e) => Err(mutation_error(MutationKind::Delete, e)),
    }
}

/// Edit a task. Without `priority`, the task keeps its current one.
pub async fn edit(
    service: &TaskService,
    id: &TaskId,
    text: &str,
    priority: Option<Priority>,
    out: &mut impl Write,
) -> Result<()> {
    preload(service).await;
    let priority = priority
        .or_else(|| service.find_task(id).map(|t| t.priority))
        .unwrap_or_default();
    let task = service
        .edit_task(id, text, priority)
        .await
        .map_err(|e| mutation_error(MutationKind::Edit, e))?;
    write_line(out, &format_task(&task))
}

pub async fn stats(service: &TaskService, out: &mut impl Write) -> Result<()> {
    let stats = service
        .load_stats()
        .await
        .map_err(|e| miette::miette!("failed to load tasks: {}", e))?;
    write_line(out, &format_stats(&stats))
}

pub async fn clear_cache(service: &TaskService, out: &mut impl Write) -> Result<()> {
    service
        .clear_local()
        .await
        .map_err(|e| miette::miette!("failed to clear local tasks: {}", e))?;
    write_line(out, "Cleared local task copy")
}
