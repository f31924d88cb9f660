//! Which list row has its actions revealed.
//!
//! At most one row is revealed at a time. The state is owned by whoever owns
//! the list and handed to rows by reference; there is no process-wide copy.

use crate::{Task, TaskId};

/// Single revealed-row slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevealState {
    revealed: Option<TaskId>,
}

impl RevealState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reveal `id`, returning the row that must be retracted, if any.
    pub fn reveal(&mut self, id: TaskId) -> Option<TaskId> {
        match self.revealed.replace(id) {
            Some(previous) if Some(&previous) != self.revealed.as_ref() => Some(previous),
            _ => None,
        }
    }

    /// Retract `id` if it is the revealed row. Returns whether it was.
    pub fn retract(&mut self, id: &TaskId) -> bool {
        if self.revealed.as_ref() == Some(id) {
            self.revealed = None;
            true
        } else {
            false
        }
    }

    /// Retract whichever row is revealed.
    pub fn retract_all(&mut self) -> Option<TaskId> {
        self.revealed.take()
    }

    pub fn is_revealed(&self, id: &TaskId) -> bool {
        self.revealed.as_ref() == Some(id)
    }

    pub fn revealed(&self) -> Option<&TaskId> {
        self.revealed.as_ref()
    }

    /// Forget the revealed row if it is no longer in `tasks`.
    pub fn retain_visible(&mut self, tasks: &[Task]) {
        if let Some(id) = &self.revealed
            && !tasks.iter().any(|t| &t.id == id)
        {
            self.revealed = None;
        }
    }
}
