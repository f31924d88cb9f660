//! Core task and filter types.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskError;

/// Maximum task text length in characters, after trimming.
pub const MAX_TEXT_LEN: usize = 200;

/// Last identifier handed out by [`TaskId::generate`], in milliseconds.
static LAST_TASK_ID: AtomicI64 = AtomicI64::new(0);

/// Opaque task identifier.
///
/// Client-generated identifiers are the decimal millisecond clock reading at
/// creation time. The generator never goes backwards, so two tasks created in
/// the same millisecond (or across a clock step back) still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new identifier from the current time.
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_millis();
        let mut prev = LAST_TASK_ID.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match LAST_TASK_ID.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Self(next.to_string()),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" | "med" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!(
                "invalid priority '{}', expected high/medium/low",
                s
            )),
        }
    }
}

/// A task record, as exchanged with the task server and stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a new, not yet persisted task. `text` must already be validated.
    pub fn new(text: String, priority: Priority) -> Self {
        let now = now_millis();
        Self {
            id: TaskId::generate(),
            text,
            completed: false,
            priority,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this task with the completion flag flipped.
    pub fn toggled(&self, at: DateTime<Utc>) -> Self {
        Self {
            completed: !self.completed,
            updated_at: at,
            ..self.clone()
        }
    }

    /// Copy of this task with new text and priority.
    pub fn edited(&self, text: &str, priority: Priority, at: DateTime<Utc>) -> Self {
        Self {
            text: text.to_string(),
            priority,
            updated_at: at,
            ..self.clone()
        }
    }
}

/// Current time truncated to the millisecond precision used on the wire.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Trim and check task text, returning the text to store.
pub fn validate_text(text: &str) -> Result<String, TaskError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TaskError::Validation(
            "task text cannot be empty".to_string(),
        ));
    }
    let len = trimmed.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(TaskError::Validation(format!(
            "task text too long ({} chars, max {})",
            len, MAX_TEXT_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Completion-status filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusFilter {
    #[default]
    All,
    Completed,
    Pending,
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "completed" | "done" => Ok(StatusFilter::Completed),
            "pending" => Ok(StatusFilter::Pending),
            _ => Err(format!(
                "invalid status '{}', expected all/completed/pending",
                s
            )),
        }
    }
}

/// Priority filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityFilter {
    #[default]
    All,
    High,
    Medium,
    Low,
}

impl PriorityFilter {
    /// The single priority this filter selects, if any.
    pub fn priority(&self) -> Option<Priority> {
        match self {
            PriorityFilter::All => None,
            PriorityFilter::High => Some(Priority::High),
            PriorityFilter::Medium => Some(Priority::Medium),
            PriorityFilter::Low => Some(Priority::Low),
        }
    }

    pub fn matches(&self, priority: Priority) -> bool {
        self.priority().is_none_or(|p| p == priority)
    }
}

impl From<Priority> for PriorityFilter {
    fn from(p: Priority) -> Self {
        match p {
            Priority::High => PriorityFilter::High,
            Priority::Medium => PriorityFilter::Medium,
            Priority::Low => PriorityFilter::Low,
        }
    }
}

impl FromStr for PriorityFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(PriorityFilter::All);
        }
        s.parse::<Priority>().map(PriorityFilter::from)
    }
}

/// Ordering by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc")]
    Ascending,
    /// Newest first.
    #[default]
    #[serde(rename = "desc")]
    Descending,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" | "oldest" => Ok(SortOrder::Ascending),
            "desc" | "descending" | "newest" => Ok(SortOrder::Descending),
            _ => Err(format!("invalid sort order '{}', expected asc/desc", s)),
        }
    }
}

/// Identity of a task list view, and the key of its cache entry.
///
/// The default value is the unfiltered base view (all tasks, newest first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub status: StatusFilter,
    pub priority: PriorityFilter,
    #[serde(default)]
    pub search: String,
    pub sort_order: SortOrder,
}

impl FilterSpec {
    /// The unfiltered view that statistics and write-through are based on.
    pub fn base() -> Self {
        Self::default()
    }

    pub fn is_base(&self) -> bool {
        *self == Self::base()
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: PriorityFilter) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Trimmed search text, or `None` when searching is effectively off.
    pub fn search_term(&self) -> Option<&str> {
        let term = self.search.trim();
        (!term.is_empty()).then_some(term)
    }
}

/// Aggregate counts over the unfiltered task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn task_ids_are_unique_and_increasing() {
        let ids: Vec<TaskId> = (0..1000).map(|_| TaskId::generate()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let values: Vec<i64> = ids.iter().map(|id| id.0.parse().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn validate_text_trims() {
        assert_eq!(validate_text("  Buy milk \n").unwrap(), "Buy milk");
    }

    #[test]
    fn validate_text_rejects_blank() {
        assert!(matches!(validate_text(""), Err(TaskError::Validation(_))));
        assert!(matches!(validate_text(" \t "), Err(TaskError::Validation(_))));
    }

    #[test]
    fn validate_text_length_limit_counts_chars() {
        let exact = "é".repeat(MAX_TEXT_LEN);
        assert!(validate_text(&exact).is_ok());

        let over = "a".repeat(MAX_TEXT_LEN + 1);
        assert!(matches!(validate_text(&over), Err(TaskError::Validation(_))));

        // Surrounding whitespace does not count toward the limit
        let padded = format!("   {}   ", "a".repeat(MAX_TEXT_LEN));
        assert!(validate_text(&padded).is_ok());
    }

    #[test]
    fn new_task_defaults() {
        let task = Task::new("Walk dog".to_string(), Priority::default());
        assert!(!task.completed);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(task.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn toggled_and_edited_keep_identity() {
        let task = Task::new("Walk dog".to_string(), Priority::Low);
        let later = task.created_at + chrono::Duration::seconds(5);

        let toggled = task.toggled(later);
        assert_eq!(toggled.id, task.id);
        assert!(toggled.completed);
        assert_eq!(toggled.created_at, task.created_at);
        assert_eq!(toggled.updated_at, later);

        let edited = task.edited("Walk cat", Priority::High, later);
        assert_eq!(edited.id, task.id);
        assert_eq!(edited.text, "Walk cat");
        assert_eq!(edited.priority, Priority::High);
        assert_eq!(edited.completed, task.completed);
    }

    #[test]
    fn task_json_shape() {
        let json = serde_json::json!({
            "id": "1718000000000",
            "text": "Buy milk",
            "completed": true,
            "priority": "High",
            "createdAt": "2024-06-10T06:13:20.000Z",
            "updatedAt": "2024-06-10T06:13:21.500Z"
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert_eq!(task.id, TaskId::from("1718000000000"));
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.updated_at.timestamp_subsec_millis(), 500);

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["createdAt"].as_str().map(|s| s.starts_with("2024-06-10T06:13:20")), Some(true));
        assert_eq!(value["priority"], "High");
    }

    #[test]
    fn task_json_defaults_missing_flags() {
        let json = serde_json::json!({
            "id": "1",
            "text": "x",
            "createdAt": "2024-06-10T06:13:20Z",
            "updatedAt": "2024-06-10T06:13:20Z"
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert!(!task.completed);
        assert_eq!(task.priority, Priority::Medium);
    }

    #[test]
    fn filter_spec_identity() {
        let base = FilterSpec::default();
        assert!(base.is_base());
        assert_eq!(base.sort_order, SortOrder::Descending);

        let pending = base.clone().with_status(StatusFilter::Pending);
        assert_ne!(pending, base);
        assert!(!pending.is_base());

        let mut keys = HashSet::new();
        keys.insert(base.clone());
        keys.insert(pending.clone());
        keys.insert(FilterSpec::default());
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn search_term_ignores_whitespace() {
        assert_eq!(FilterSpec::default().with_search("   ").search_term(), None);
        assert_eq!(FilterSpec::default().with_search(" milk ").search_term(), Some("milk"));
    }

    #[test]
    fn priority_filter_matches() {
        assert!(PriorityFilter::All.matches(Priority::Low));
        assert!(PriorityFilter::High.matches(Priority::High));
        assert!(!PriorityFilter::High.matches(Priority::Medium));
    }

    #[test]
    fn parse_filters() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("all".parse::<PriorityFilter>().unwrap(), PriorityFilter::All);
        assert_eq!("low".parse::<PriorityFilter>().unwrap(), PriorityFilter::Low);
        assert_eq!("pending".parse::<StatusFilter>().unwrap(), StatusFilter::Pending);
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
