//! In-memory cache of task list views.
//!
//! One entry per [`FilterSpec`]. Entries are only ever replaced whole: every
//! write swaps in a new task sequence under the cache lock, and no lock is
//! held across an `.await`, so each operation is atomic with respect to other
//! tasks on the runtime.
//!
//! Fetches are tracked with [`FetchTicket`]s. A ticket records the cache epoch
//! it was issued in and a global generation number. Optimistic writes,
//! rollbacks and invalidations advance the epoch, which turns every fetch
//! still in flight into a stale read whose result is never stored.
//!
//! Every write is announced on a broadcast channel so open queries can follow
//! optimistic updates, rollbacks and invalidations as they happen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{FilterSpec, Task};

/// Default time a remote result is served without refetching.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Broadcast channel capacity for cache updates.
const BROADCAST_CHANNEL_CAPACITY: usize = 256;

/// Change notification sent to cache subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    /// A fetch result was stored for the view.
    Stored(FilterSpec),
    /// An optimistic transform was applied to every entry.
    Optimistic,
    /// Entries were restored from a snapshot.
    RolledBack,
    /// Entries were marked invalid and should be refetched.
    Invalidated,
    /// Every entry was dropped.
    Cleared,
}

/// Where an entry's tasks came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// Task server response.
    Remote,
    /// Locally saved list, used while the server was unreachable.
    Fallback,
}

/// A cached task list view.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Tasks in view order.
    pub tasks: Vec<Task>,
    /// When the entry was stored.
    pub stored_at: Instant,
    /// Cleared by invalidation.
    pub valid: bool,
    pub source: EntrySource,
    generation: u64,
}

impl CacheEntry {
    /// Whether this entry may be served without asking the server again.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.valid && self.source == EntrySource::Remote && self.stored_at.elapsed() <= window
    }
}

/// Copy of every cache entry at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    entries: HashMap<FilterSpec, CacheEntry>,
}

impl CacheSnapshot {
    pub fn get(&self, spec: &FilterSpec) -> Option<&CacheEntry> {
        self.entries.get(spec)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle for one outstanding fetch of a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    spec: FilterSpec,
    generation: u64,
    epoch: u64,
}

impl FetchTicket {
    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<FilterSpec, CacheEntry>,
    epoch: u64,
}

/// Keyed cache of task list views.
pub struct QueryCache {
    state: RwLock<CacheState>,
    freshness_window: Duration,
    next_generation: AtomicU64,
    /// Broadcast channel for cache updates.
    updates_tx: broadcast::Sender<CacheUpdate>,
}

impl QueryCache {
    /// Create an empty cache with the given freshness window.
    pub fn new(freshness_window: Duration) -> Arc<Self> {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(CacheState::default()),
            freshness_window,
            next_generation: AtomicU64::new(1),
            updates_tx,
        })
    }

    /// Subscribe to cache updates.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates_tx.subscribe()
    }

    /// Send a cache update to subscribers. Called after the state lock is
    /// released.
    fn broadcast(&self, update: CacheUpdate) {
        if self.updates_tx.send(update).is_err() {
            trace!("cache: no subscribers for update");
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tasks for `spec` if the entry is valid and inside the freshness window.
    pub fn fresh(&self, spec: &FilterSpec) -> Option<Vec<Task>> {
        let state = self.read_state();
        let entry = state.entries.get(spec)?;
        if entry.is_fresh(self.freshness_window) {
            trace!(?spec, "cache: fresh hit");
            Some(entry.tasks.clone())
        } else {
            trace!(?spec, valid = entry.valid, source = ?entry.source, "cache: stale entry");
            None
        }
    }

    /// Tasks for `spec` regardless of freshness.
    pub fn tasks(&self, spec: &FilterSpec) -> Option<Vec<Task>> {
        self.read_state().entries.get(spec).map(|e| e.tasks.clone())
    }

    /// Full entry for `spec`.
    pub fn entry(&self, spec: &FilterSpec) -> Option<CacheEntry> {
        self.read_state().entries.get(spec).cloned()
    }

    /// Find a task by id in any cached view, preferring the base view.
    pub fn find_task(&self, id: &crate::TaskId) -> Option<Task> {
        let state = self.read_state();
        if let Some(base) = state.entries.get(&FilterSpec::base()) {
            return base.tasks.iter().find(|t| &t.id == id).cloned();
        }
        state
            .entries
            .values()
            .flat_map(|e| e.tasks.iter())
            .find(|t| &t.id == id)
            .cloned()
    }

    /// Cached view keys.
    pub fn specs(&self) -> Vec<FilterSpec> {
        self.read_state().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().entries.is_empty()
    }

    /// Register a fetch for `spec` that is about to start.
    pub fn begin_fetch(&self, spec: &FilterSpec) -> FetchTicket {
        let epoch = self.read_state().epoch;
        FetchTicket {
            spec: spec.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
            epoch,
        }
    }

    /// Store the result of a fetch.
    ///
    /// Returns false, leaving the cache untouched, when the ticket has been
    /// superseded: a cache-wide write happened since it was issued, or a
    /// later fetch of the same view already resolved.
    pub fn complete_fetch(&self, ticket: &FetchTicket, tasks: Vec<Task>, source: EntrySource) -> bool {
        let mut state = self.write_state();

        if ticket.epoch != state.epoch {
            debug!(spec = ?ticket.spec, "cache: discarding fetch from before a cache write");
            return false;
        }
        if let Some(existing) = state.entries.get(&ticket.spec)
            && existing.generation > ticket.generation
        {
            debug!(spec = ?ticket.spec, "cache: discarding superseded fetch");
            return false;
        }

        trace!(spec = ?ticket.spec, count = tasks.len(), ?source, "cache: stored");
        state.entries.insert(
            ticket.spec.clone(),
            CacheEntry {
                tasks,
                stored_at: Instant::now(),
                valid: true,
                source,
                generation: ticket.generation,
            },
        );
        drop(state);

        self.broadcast(CacheUpdate::Stored(ticket.spec.clone()));
        true
    }

    /// Store tasks for `spec` as a completed fetch.
    pub fn insert(&self, spec: &FilterSpec, tasks: Vec<Task>, source: EntrySource) {
        let ticket = self.begin_fetch(spec);
        self.complete_fetch(&ticket, tasks, source);
    }

    /// Mark every entry whose key satisfies `predicate` invalid.
    ///
    /// Returns the number of entries that matched.
    pub fn invalidate(&self, predicate: impl Fn(&FilterSpec) -> bool) -> usize {
        let mut state = self.write_state();
        state.epoch += 1;
        let mut count = 0;
        for (spec, entry) in state.entries.iter_mut() {
            if predicate(spec) {
                entry.valid = false;
                count += 1;
            }
        }
        drop(state);

        debug!(count, "cache: invalidated entries");
        self.broadcast(CacheUpdate::Invalidated);
        count
    }

    pub fn invalidate_all(&self) -> usize {
        self.invalidate(|_| true)
    }

    /// Copy the current entries.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.read_state().entries.clone(),
        }
    }

    /// Replace each entry's tasks with `transform(spec, tasks)`.
    ///
    /// Returns the entries as they were before the transform. Freshness and
    /// validity of the entries are left as they were.
    pub fn apply_optimistic(
        &self,
        transform: impl Fn(&FilterSpec, &[Task]) -> Vec<Task>,
    ) -> CacheSnapshot {
        let mut state = self.write_state();
        let snapshot = CacheSnapshot {
            entries: state.entries.clone(),
        };

        state.epoch += 1;
        for (spec, entry) in state.entries.iter_mut() {
            entry.tasks = transform(spec, &entry.tasks);
        }
        drop(state);

        trace!(entries = snapshot.len(), "cache: applied optimistic transform");
        self.broadcast(CacheUpdate::Optimistic);
        snapshot
    }

    /// Replace all entries with `snapshot`.
    pub fn rollback(&self, snapshot: CacheSnapshot) {
        let mut state = self.write_state();
        state.epoch += 1;
        state.entries = snapshot.entries;
        let entries = state.entries.len();
        drop(state);

        debug!(entries, "cache: rolled back");
        self.broadcast(CacheUpdate::RolledBack);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.write_state();
        state.epoch += 1;
        state.entries.clear();
        drop(state);

        self.broadcast(CacheUpdate::Cleared);
    }
}
