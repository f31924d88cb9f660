//! Reactive task list reads.
//!
//! A [`TaskQuery`] follows one view at a time. Its state is published on a
//! `watch` channel so any number of observers see loading, data and error
//! transitions. Every load is numbered; when the view changes or a newer load
//! starts before an older one resolves, the older result is dropped.
//!
//! While the query is alive it also listens to the cache's update channel:
//! optimistic writes and rollbacks show up in `data` as soon as they are
//! applied, and an invalidated view is refetched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheUpdate;
use crate::service::TaskService;
use crate::{FilterSpec, Task, TaskError};

/// Observable state of a task list read.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    /// Last resolved tasks. Kept while a reload is in flight or has failed.
    pub data: Option<Vec<Task>>,
    pub is_loading: bool,
    /// Error of the last load, cleared by the next successful one.
    pub error: Option<Arc<TaskError>>,
}

/// State shared between a query handle and its cache listener.
struct QueryShared {
    service: TaskService,
    spec: Mutex<FilterSpec>,
    state: watch::Sender<QueryState>,
    request_seq: AtomicU64,
}

/// Handle over the task list for a [`FilterSpec`].
///
/// Dropping the handle stops its cache listener.
pub struct TaskQuery {
    shared: Arc<QueryShared>,
    listener: JoinHandle<()>,
}

impl TaskQuery {
    /// Create an idle query. Cached tasks for `spec`, if any, are shown
    /// immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(service: TaskService, spec: FilterSpec) -> Self {
        let updates = service.cache().subscribe();
        let initial = QueryState {
            data: service.cache().tasks(&spec),
            ..QueryState::default()
        };
        let (state, _) = watch::channel(initial);
        let shared = Arc::new(QueryShared {
            service,
            spec: Mutex::new(spec),
            state,
            request_seq: AtomicU64::new(0),
        });
        let listener = tokio::spawn(follow_cache(Arc::clone(&shared), updates));
        Self { shared, listener }
    }

    /// Current view.
    pub fn spec(&self) -> FilterSpec {
        self.shared.spec()
    }

    /// Current state.
    pub fn state(&self) -> QueryState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.shared.state.subscribe()
    }

    /// Load the view, serving fresh cached data without a request.
    pub async fn load(&self) {
        self.shared.run(false).await;
    }

    /// Reload the view from the server.
    pub async fn refetch(&self) {
        self.shared.run(true).await;
    }

    /// Switch to another view and load it.
    pub async fn set_spec(&self, spec: FilterSpec) {
        {
            let mut current = self.shared.spec.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == spec {
                return;
            }
            *current = spec.clone();
        }
        let cached = self.shared.service.cache().tasks(&spec);
        self.shared.state.send_modify(|state| state.data = cached);
        self.load().await;
    }
}

impl Drop for TaskQuery {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl QueryShared {
    fn spec(&self) -> FilterSpec {
        self.spec.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn run(&self, force: bool) {
        let seq = self.request_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let spec = self.spec();
        self.state.send_modify(|state| state.is_loading = true);

        let result = if force {
            self.service.reload_tasks(&spec).await
        } else {
            self.service.fetch_tasks(&spec).await
        };

        if self.request_seq.load(Ordering::SeqCst) != seq {
            debug!(?spec, "dropping superseded task list read");
            return;
        }

        self.state.send_modify(|state| {
            state.is_loading = false;
            match result {
                Ok(tasks) => {
                    state.data = Some(tasks);
                    state.error = None;
                }
                Err(e) => state.error = Some(Arc::new(e)),
            }
        });
    }

    /// Publish the cached tasks for the current view if they changed.
    ///
    /// Returns whether the cached entry is invalid.
    fn sync_from_cache(&self) -> bool {
        let spec = self.spec();
        let Some(entry) = self.service.cache().entry(&spec) else {
            return false;
        };

        let invalid = !entry.valid;
        self.state.send_if_modified(|state| {
            if state.data.as_ref() == Some(&entry.tasks) {
                return false;
            }
            state.data = Some(entry.tasks);
            true
        });
        invalid
    }
}

/// Mirror cache writes into the query until the cache goes away.
async fn follow_cache(shared: Arc<QueryShared>, mut updates: broadcast::Receiver<CacheUpdate>) {
    loop {
        let refetch = match updates.recv().await {
            Ok(CacheUpdate::Invalidated) => true,
            Ok(_) => false,
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "task query listener lagged, reloading");
                true
            }
            Err(RecvError::Closed) => break,
        };

        if shared.sync_from_cache() && refetch {
            shared.run(false).await;
        }
    }
}
