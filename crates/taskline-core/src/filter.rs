//! Filtering, ordering and statistics over task lists.
//!
//! Everything here is pure: inputs are borrowed and a new list is returned.

use crate::{FilterSpec, SortOrder, StatusFilter, Task, TaskStats};

/// Check whether a task belongs in the view described by `spec`.
pub fn matches(task: &Task, spec: &FilterSpec) -> bool {
    let status_ok = match spec.status {
        StatusFilter::All => true,
        StatusFilter::Completed => task.completed,
        StatusFilter::Pending => !task.completed,
    };
    if !status_ok || !spec.priority.matches(task.priority) {
        return false;
    }
    match spec.search_term() {
        Some(term) => task.text.to_lowercase().contains(&term.to_lowercase()),
        None => true,
    }
}

/// Sort in place by creation time. Stable: ties keep their relative order.
pub fn sort(tasks: &mut [Task], order: SortOrder) {
    match order {
        SortOrder::Ascending => tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortOrder::Descending => tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

/// Compute the view of `tasks` described by `spec`.
pub fn apply(tasks: &[Task], spec: &FilterSpec) -> Vec<Task> {
    let mut view: Vec<Task> = tasks
        .iter()
        .filter(|task| matches(task, spec))
        .cloned()
        .collect();
    sort(&mut view, spec.sort_order);
    view
}

/// Counts over the full task list. Callers pass the unfiltered list; the
/// numbers never depend on the active filter.
pub fn stats(tasks: &[Task]) -> TaskStats {
    let total = tasks.len();
    let completed = tasks.iter().filter(|t| t.completed).count();
    TaskStats {
        total,
        completed,
        pending: total - completed,
    }
}
