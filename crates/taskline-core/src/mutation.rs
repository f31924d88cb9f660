//! Optimistic mutations against the task server.
//!
//! Every write goes through the same sequence:
//!
//! 1. validate input (nothing is touched on failure)
//! 2. snapshot the cache and apply an optimistic transform to every view
//! 3. issue the remote request
//! 4. on success, swap the server's copy into the cache, invalidate every
//!    view and write the base list through to local storage
//! 5. on failure, restore the snapshot and surface the error
//!
//! Steps 2 and 3 happen without an intervening suspension point: the remote
//! future is built before the transform and first polled right after it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheSnapshot, QueryCache};
use crate::storage::LocalTaskStore;
use crate::{
    FilterSpec, Priority, Task, TaskError, TaskId, TaskStore, filter, now_millis, validate_text,
};

/// The four task mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Add,
    Toggle,
    Delete,
    Edit,
}

impl MutationKind {
    /// Short description of the attempted action, for user notifications.
    pub fn action(&self) -> &'static str {
        match self {
            MutationKind::Add => "add task",
            MutationKind::Toggle => "update task",
            MutationKind::Delete => "delete task",
            MutationKind::Edit => "edit task",
        }
    }

    /// Notification text for a failed mutation.
    pub fn failure_message(&self, err: &TaskError) -> String {
        format!("Failed to {}: {}", self.action(), err)
    }

    /// Errors after which the optimistic state is already what the server holds.
    fn keeps_optimistic_state(&self, err: &TaskError) -> bool {
        matches!(self, MutationKind::Delete) && err.is_not_found()
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Add => "add",
            MutationKind::Toggle => "toggle",
            MutationKind::Delete => "delete",
            MutationKind::Edit => "edit",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    OptimisticApplied,
    Confirmed,
    RolledBack,
}

impl MutationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationPhase::Confirmed | MutationPhase::RolledBack)
    }
}

/// A mutation that has not touched the cache yet.
struct PendingMutation {
    kind: MutationKind,
}

/// A mutation whose optimistic transform is visible in the cache.
///
/// Consumed by exactly one of `confirm` or `roll_back`, so it can never be
/// applied twice.
struct AppliedMutation {
    kind: MutationKind,
    snapshot: CacheSnapshot,
}

impl PendingMutation {
    fn new(kind: MutationKind) -> Self {
        Self { kind }
    }

    fn phase(&self) -> MutationPhase {
        MutationPhase::Idle
    }

    fn apply(
        self,
        cache: &QueryCache,
        transform: impl Fn(&FilterSpec, &[Task]) -> Vec<Task>,
    ) -> AppliedMutation {
        let snapshot = cache.apply_optimistic(transform);
        AppliedMutation {
            kind: self.kind,
            snapshot,
        }
    }
}

impl AppliedMutation {
    fn phase(&self) -> MutationPhase {
        MutationPhase::OptimisticApplied
    }

    /// Keep the optimistic state, fold in the server's copy and invalidate.
    fn confirm(self, cache: &QueryCache, target: &TaskId, server: Option<&Task>) -> MutationPhase {
        if let Some(server) = server {
            cache.apply_optimistic(|_, tasks| replace_task(tasks, target, |_| server.clone()));
        }
        cache.invalidate_all();
        debug!(kind = %self.kind, "mutation confirmed");
        MutationPhase::Confirmed
    }

    /// Restore the cache to its state before the transform.
    fn roll_back(self, cache: &QueryCache) -> MutationPhase {
        cache.rollback(self.snapshot);
        debug!(kind = %self.kind, "mutation rolled back");
        MutationPhase::RolledBack
    }
}

/// Remote results that carry the server's copy of the mutated task.
pub trait Confirmation {
    fn confirmed_task(&self) -> Option<&Task>;
}

impl Confirmation for Task {
    fn confirmed_task(&self) -> Option<&Task> {
        Some(self)
    }
}

impl Confirmation for () {
    fn confirmed_task(&self) -> Option<&Task> {
        None
    }
}

/// Runs task mutations with optimistic cache updates.
#[derive(Clone)]
pub struct MutationCoordinator {
    cache: Arc<QueryCache>,
    store: Arc<dyn TaskStore>,
    local: LocalTaskStore,
}

impl MutationCoordinator {
    pub fn new(cache: Arc<QueryCache>, store: Arc<dyn TaskStore>, local: LocalTaskStore) -> Self {
        Self {
            cache,
            store,
            local,
        }
    }

    /// Create a task.
    pub async fn add(&self, text: &str, priority: Priority) -> Result<Task, TaskError> {
        let text = validate_text(text)?;
        let provisional = Task::new(text, priority);

        let remote = self.store.create(&provisional);
        self.run(
            MutationKind::Add,
            &provisional.id,
            |spec, tasks| insert_task(spec, tasks, &provisional),
            remote,
        )
        .await
    }

    /// Flip a task's completion flag.
    pub async fn toggle(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.ensure_cached(id)?;
        let now = now_millis();

        let store = Arc::clone(&self.store);
        let remote = async move {
            let current = store.get(id).await?;
            store.update(&current.toggled(now_millis())).await
        };
        self.run(
            MutationKind::Toggle,
            id,
            |_, tasks| replace_task(tasks, id, |t| t.toggled(now)),
            remote,
        )
        .await
    }

    /// Replace a task's text and priority.
    pub async fn edit(&self, id: &TaskId, text: &str, priority: Priority) -> Result<Task, TaskError> {
        let text = validate_text(text)?;
        self.ensure_cached(id)?;
        let now = now_millis();

        let store = Arc::clone(&self.store);
        let remote_text = text.clone();
        let remote = async move {
            let current = store.get(id).await?;
            store
                .update(&current.edited(&remote_text, priority, now_millis()))
                .await
        };
        self.run(
            MutationKind::Edit,
            id,
            |_, tasks| replace_task(tasks, id, |t| t.edited(&text, priority, now)),
            remote,
        )
        .await
    }

    /// Delete a task.
    ///
    /// A task the server no longer has is reported as `NotFound`, but stays
    /// removed from the cache.
    pub async fn delete(&self, id: &TaskId) -> Result<(), TaskError> {
        let remote = self.store.delete(id);
        self.run(
            MutationKind::Delete,
            id,
            |_, tasks| remove_task(tasks, id),
            remote,
        )
        .await
    }

    fn ensure_cached(&self, id: &TaskId) -> Result<(), TaskError> {
        match self.cache.find_task(id) {
            Some(_) => Ok(()),
            None => Err(TaskError::NotFound { id: id.clone() }),
        }
    }

    async fn run<T, F>(
        &self,
        kind: MutationKind,
        target: &TaskId,
        transform: impl Fn(&FilterSpec, &[Task]) -> Vec<Task>,
        remote: F,
    ) -> Result<T, TaskError>
    where
        T: Confirmation,
        F: Future<Output = Result<T, TaskError>>,
    {
        let pending = PendingMutation::new(kind);
        debug_assert_eq!(pending.phase(), MutationPhase::Idle);

        let applied = pending.apply(&self.cache, transform);
        debug_assert_eq!(applied.phase(), MutationPhase::OptimisticApplied);

        match remote.await {
            Ok(value) => {
                applied.confirm(&self.cache, target, value.confirmed_task());
                info!(kind = %kind, id = %target, "task mutation confirmed");
                self.write_through().await;
                Ok(value)
            }
            Err(e) if kind.keeps_optimistic_state(&e) => {
                applied.confirm(&self.cache, target, None);
                warn!(kind = %kind, id = %target, "task already gone on server");
                self.write_through().await;
                Err(e)
            }
            Err(e) => {
                applied.roll_back(&self.cache);
                warn!(kind = %kind, id = %target, error = %e, "task mutation failed, rolled back");
                Err(e)
            }
        }
    }

    /// Save the base list locally. Failures are logged and swallowed.
    async fn write_through(&self) {
        let base = FilterSpec::base();
        let tasks = match self.cache.tasks(&base) {
            Some(tasks) => tasks,
            None => match self.store.list(&base).await {
                Ok(tasks) => filter::apply(&tasks, &base),
                Err(e) => {
                    warn!(error = %e, "skipping local write-through, base list unavailable");
                    return;
                }
            },
        };

        if let Err(e) = self.local.save(&tasks).await {
            warn!(error = %e, "failed to sync tasks to local storage");
        }
    }
}

/// `tasks` plus `task` if it belongs in the view, in view order.
pub(crate) fn insert_task(spec: &FilterSpec, tasks: &[Task], task: &Task) -> Vec<Task> {
    let mut next = tasks.to_vec();
    if filter::matches(task, spec) {
        next.push(task.clone());
        filter::sort(&mut next, spec.sort_order);
    }
    next
}

/// `tasks` with the task identified by `id` replaced by `f(task)`.
pub(crate) fn replace_task(tasks: &[Task], id: &TaskId, f: impl Fn(&Task) -> Task) -> Vec<Task> {
    tasks
        .iter()
        .map(|t| if &t.id == id { f(t) } else { t.clone() })
        .collect()
}

/// `tasks` without the task identified by `id`.
pub(crate) fn remove_task(tasks: &[Task], id: &TaskId) -> Vec<Task> {
    tasks.iter().filter(|t| &t.id != id).cloned().collect()
}
