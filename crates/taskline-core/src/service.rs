//! The consumer-facing task service.
//!
//! [`TaskService`] ties the remote store, the query cache, the local fallback
//! copy and the mutation coordinator together. It is cheap to clone; clones
//! share one cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{DEFAULT_FRESHNESS_WINDOW, EntrySource, QueryCache};
use crate::mutation::MutationCoordinator;
use crate::query::TaskQuery;
use crate::storage::{KeyValueStore, LocalTaskStore};
use crate::{FilterSpec, Priority, StorageError, Task, TaskError, TaskId, TaskStats, TaskStore, filter};

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How long a remote result is served from cache.
    pub freshness_window: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}

impl ServiceConfig {
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }
}

/// Cached, offline-tolerant access to tasks.
#[derive(Clone)]
pub struct TaskService {
    cache: Arc<QueryCache>,
    store: Arc<dyn TaskStore>,
    local: LocalTaskStore,
    mutations: MutationCoordinator,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, kv: Arc<dyn KeyValueStore>, config: ServiceConfig) -> Self {
        let cache = QueryCache::new(config.freshness_window);
        let local = LocalTaskStore::new(kv);
        let mutations = MutationCoordinator::new(Arc::clone(&cache), Arc::clone(&store), local.clone());
        Self {
            cache,
            store,
            local,
            mutations,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Tasks for `spec`, served from cache while fresh.
    pub async fn fetch_tasks(&self, spec: &FilterSpec) -> Result<Vec<Task>, TaskError> {
        if let Some(tasks) = self.cache.fresh(spec) {
            return Ok(tasks);
        }
        self.read_remote(spec).await
    }

    /// Tasks for `spec`, always asking the server first.
    pub async fn reload_tasks(&self, spec: &FilterSpec) -> Result<Vec<Task>, TaskError> {
        self.read_remote(spec).await
    }

    async fn read_remote(&self, spec: &FilterSpec) -> Result<Vec<Task>, TaskError> {
        let ticket = self.cache.begin_fetch(spec);

        match self.store.list(spec).await {
            Ok(tasks) => {
                let view = filter::apply(&tasks, spec);
                debug!(?spec, count = view.len(), "fetched tasks");
                if !self.cache.complete_fetch(&ticket, view.clone(), EntrySource::Remote) {
                    return Ok(self.superseded(spec, view));
                }
                if spec.is_base() {
                    if let Err(e) = self.local.save(&view).await {
                        warn!(error = %e, "failed to refresh local task copy");
                    }
                }
                Ok(view)
            }
            Err(e) if e.is_network() => {
                warn!(?spec, error = %e, "task server unreachable, using local copy");
                match self.local.load().await {
                    Some(saved) => {
                        let view = filter::apply(&saved, spec);
                        if !self.cache.complete_fetch(&ticket, view.clone(), EntrySource::Fallback) {
                            return Ok(self.superseded(spec, view));
                        }
                        Ok(view)
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Result for a read the cache refused to store: a mutation or a newer
    /// read got there first, so the cached tasks are the current ones.
    fn superseded(&self, spec: &FilterSpec, view: Vec<Task>) -> Vec<Task> {
        match self.cache.tasks(spec) {
            Some(current) => {
                debug!(?spec, "read overtaken by a cache write, serving cached tasks");
                current
            }
            None => view,
        }
    }

    /// Reactive handle over the view described by `spec`, loaded once.
    pub async fn list_tasks(&self, spec: FilterSpec) -> TaskQuery {
        let query = TaskQuery::new(self.clone(), spec);
        query.load().await;
        query
    }

    pub async fn add_task(&self, text: &str, priority: Priority) -> Result<Task, TaskError> {
        self.mutations.add(text, priority).await
    }

    pub async fn toggle_task(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.mutations.toggle(id).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<(), TaskError> {
        self.mutations.delete(id).await
    }

    pub async fn edit_task(&self, id: &TaskId, text: &str, priority: Priority) -> Result<Task, TaskError> {
        self.mutations.edit(id, text, priority).await
    }

    /// Counts over the cached unfiltered list, zero when it is not loaded.
    pub fn stats(&self) -> TaskStats {
        self.cache
            .tasks(&FilterSpec::base())
            .map(|tasks| filter::stats(&tasks))
            .unwrap_or_default()
    }

    /// Counts over the unfiltered list, loading it first if needed.
    pub async fn load_stats(&self) -> Result<TaskStats, TaskError> {
        let tasks = self.fetch_tasks(&FilterSpec::base()).await?;
        Ok(filter::stats(&tasks))
    }

    /// Cached copy of a task.
    pub fn find_task(&self, id: &TaskId) -> Option<Task> {
        self.cache.find_task(id)
    }

    /// Drop the local fallback copy and every cached view.
    pub async fn clear_local(&self) -> Result<(), StorageError> {
        self.cache.clear();
        self.local.clear().await
    }
}
