//! Stateful property testing for QueryCache optimistic writes.
//!
//! Uses proptest-state-machine to interleave fetches, optimistic transforms,
//! rollbacks and invalidations, checking the cache against a plain map model
//! after every step.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};

use taskline_core::cache::DEFAULT_FRESHNESS_WINDOW;
use taskline_core::{
    CacheSnapshot, EntrySource, FilterSpec, Priority, PriorityFilter, QueryCache, SortOrder, StatusFilter, Task,
    TaskId,
};

/// Views the operations draw from.
fn specs() -> Vec<FilterSpec> {
    vec![
        FilterSpec::base(),
        FilterSpec::base().with_status(StatusFilter::Pending),
        FilterSpec::base().with_priority(PriorityFilter::High),
        FilterSpec::base().with_sort_order(SortOrder::Ascending),
    ]
}

fn make_task(n: u8, completed: bool) -> Task {
    let at = Utc.timestamp_millis_opt(1_700_000_000_000 + n as i64 * 1000).unwrap();
    Task {
        id: TaskId(format!("t{}", n)),
        text: format!("task {}", n),
        completed,
        priority: if n % 2 == 0 { Priority::High } else { Priority::Low },
        created_at: at,
        updated_at: at,
    }
}

/// Pure transforms an optimistic write may apply.
#[derive(Debug, Clone, Copy)]
pub enum Transform {
    Append(u8),
    RemoveFirst,
    ToggleAll,
    Clear,
}

impl Transform {
    fn apply(self, _spec: &FilterSpec, tasks: &[Task]) -> Vec<Task> {
        match self {
            Transform::Append(n) => {
                let mut next = tasks.to_vec();
                next.push(make_task(n, false));
                next
            }
            Transform::RemoveFirst => tasks.iter().skip(1).cloned().collect(),
            Transform::ToggleAll => tasks.iter().map(|t| t.toggled(t.updated_at)).collect(),
            Transform::Clear => Vec::new(),
        }
    }
}

/// Operations performed on the cache.
#[derive(Debug, Clone)]
pub enum CacheOperation {
    /// Store a fetch result.
    Insert { spec: usize, tasks: Vec<Task> },
    /// Apply a transform, keeping the returned snapshot.
    ApplyOptimistic(Transform),
    /// Restore the most recent snapshot.
    Rollback,
    /// Invalidate every entry.
    InvalidateAll,
    /// Invalidate every entry twice in a row.
    InvalidateAllTwice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    tasks: Vec<Task>,
    valid: bool,
}

/// Reference model: entries by view plus pending snapshots.
#[derive(Clone, Debug, Default)]
pub struct CacheModel {
    entries: HashMap<FilterSpec, ModelEntry>,
    snapshots: Vec<HashMap<FilterSpec, ModelEntry>>,
}

impl ReferenceStateMachine for CacheModel {
    type State = Self;
    type Transition = CacheOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let task = (0u8..20, any::<bool>()).prop_map(|(n, completed)| make_task(n, completed));

        prop_oneof![
            3 => (0..specs().len(), prop::collection::vec(task, 0..5))
                .prop_map(|(spec, tasks)| CacheOperation::Insert { spec, tasks }),
            3 => prop_oneof![
                (20u8..40).prop_map(Transform::Append),
                Just(Transform::RemoveFirst),
                Just(Transform::ToggleAll),
                Just(Transform::Clear),
            ]
            .prop_map(CacheOperation::ApplyOptimistic),
            2 => Just(CacheOperation::Rollback),
            1 => Just(CacheOperation::InvalidateAll),
            1 => Just(CacheOperation::InvalidateAllTwice),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            CacheOperation::Insert { spec, tasks } => {
                state.entries.insert(
                    specs()[*spec].clone(),
                    ModelEntry {
                        tasks: tasks.clone(),
                        valid: true,
                    },
                );
            }
            CacheOperation::ApplyOptimistic(transform) => {
                state.snapshots.push(state.entries.clone());
                for (spec, entry) in state.entries.iter_mut() {
                    entry.tasks = transform.apply(spec, &entry.tasks);
                }
            }
            CacheOperation::Rollback => {
                if let Some(snapshot) = state.snapshots.pop() {
                    state.entries = snapshot;
                }
            }
            CacheOperation::InvalidateAll | CacheOperation::InvalidateAllTwice => {
                for entry in state.entries.values_mut() {
                    entry.valid = false;
                }
            }
        }
        state
    }

    fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
        match transition {
            CacheOperation::Rollback => !state.snapshots.is_empty(),
            _ => true,
        }
    }
}

/// Test harness around a real QueryCache.
pub struct CacheTestHarness {
    cache: Arc<QueryCache>,
    snapshots: Vec<CacheSnapshot>,
}

impl StateMachineTest for CacheTestHarness {
    type SystemUnderTest = Self;
    type Reference = CacheModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self {
            cache: QueryCache::new(DEFAULT_FRESHNESS_WINDOW),
            snapshots: Vec::new(),
        }
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        match transition {
            CacheOperation::Insert { spec, tasks } => {
                state.cache.insert(&specs()[spec], tasks, EntrySource::Remote);
            }
            CacheOperation::ApplyOptimistic(transform) => {
                let before = state.cache.snapshot();
                let snapshot = state.cache.apply_optimistic(|spec, tasks| transform.apply(spec, tasks));
                // The returned snapshot is exactly the pre-transform state
                assert_eq!(snapshot, before);
                state.snapshots.push(snapshot);
            }
            CacheOperation::Rollback => {
                let snapshot = state.snapshots.pop().expect("precondition guarantees a snapshot");
                let expected = snapshot.clone();
                state.cache.rollback(snapshot);
                assert_eq!(state.cache.snapshot(), expected);
            }
            CacheOperation::InvalidateAll => {
                state.cache.invalidate_all();
            }
            CacheOperation::InvalidateAllTwice => {
                state.cache.invalidate_all();
                let once = state.cache.snapshot();
                state.cache.invalidate_all();
                assert_eq!(state.cache.snapshot(), once);
            }
        }
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        let snapshot = state.cache.snapshot();
        assert_eq!(snapshot.len(), ref_state.entries.len());
        for (spec, expected) in &ref_state.entries {
            let entry = snapshot.get(spec).expect("model entry missing from cache");
            assert_eq!(&entry.tasks, &expected.tasks, "tasks differ for {:?}", spec);
            assert_eq!(entry.valid, expected.valid, "validity differs for {:?}", spec);
        }
        assert_eq!(state.snapshots.len(), ref_state.snapshots.len());
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn query_cache_state_machine_test(sequential 1..30 => CacheTestHarness);
}

// Targeted checks

#[test]
fn test_rollback_after_nested_writes_restores_outer_state() {
    let cache = QueryCache::new(DEFAULT_FRESHNESS_WINDOW);
    cache.insert(&FilterSpec::base(), vec![make_task(1, false)], EntrySource::Remote);
    let original = cache.snapshot();

    let outer = cache.apply_optimistic(|spec, tasks| Transform::Append(2).apply(spec, tasks));
    let inner = cache.apply_optimistic(|spec, tasks| Transform::ToggleAll.apply(spec, tasks));

    cache.rollback(inner);
    assert_eq!(cache.tasks(&FilterSpec::base()).unwrap().len(), 2);

    cache.rollback(outer);
    assert_eq!(cache.snapshot(), original);
}

#[test]
fn test_rollback_restores_validity() {
    let cache = QueryCache::new(DEFAULT_FRESHNESS_WINDOW);
    cache.insert(&FilterSpec::base(), vec![make_task(1, false)], EntrySource::Remote);

    let snapshot = cache.apply_optimistic(|spec, tasks| Transform::Clear.apply(spec, tasks));
    cache.invalidate_all();
    cache.rollback(snapshot);

    assert!(cache.entry(&FilterSpec::base()).unwrap().valid);
}
