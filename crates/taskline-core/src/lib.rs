//! Offline-tolerant task list client.
//!
//! This crate keeps a cache of task list views in front of a REST task
//! server, applies mutations optimistically and falls back to a locally saved
//! copy when the server cannot be reached.
//!
//! ## Features
//!
//! - **Client**: `TaskStore` trait and a reqwest-backed REST implementation
//! - **Cache**: Views keyed by `FilterSpec` with freshness and rollback
//! - **Mutations**: One coordinator for add, toggle, delete and edit
//! - **Storage**: Write-through copy of the full list for offline reads
//! - **Queries**: Watchable read handles with stale-read suppression

pub mod cache;
mod client;
mod error;
pub mod filter;
pub mod mutation;
pub mod query;
pub mod reveal;
pub mod service;
pub mod storage;
mod types;

pub use cache::{CacheEntry, CacheSnapshot, CacheUpdate, EntrySource, FetchTicket, QueryCache};
pub use client::{ClientConfig, RestTaskStore, TaskStore};
pub use error::{NetworkError, StorageError, TaskError};
pub use mutation::{MutationCoordinator, MutationKind, MutationPhase};
pub use query::{QueryState, TaskQuery};
pub use reveal::RevealState;
pub use service::{ServiceConfig, TaskService};
pub use storage::{FileStore, KeyValueStore, LocalTaskStore, MemoryStore};
pub use types::*;
