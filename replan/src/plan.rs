use serde::{Deserialize, Serialize};

use crate::core::types::{Subtask, SubtaskStatus};

/// Ordered subtasks for one run.
///
/// The only structural mutation is [`Plan::replace_remaining`], which swaps the
/// suffix after the completed prefix. Ids are allocated from a per-plan counter
/// and never reused, so ids stay unique across revisions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub goal: String,
    pub subtasks: Vec<Subtask>,
    next_id: u32,
}

impl Plan {
    pub fn new<I, S>(goal: impl Into<String>, descriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut plan = Self {
            goal: goal.into(),
            subtasks: Vec::new(),
            next_id: 1,
        };
        let subtasks: Vec<Subtask> = descriptions
            .into_iter()
            .map(|description| plan.allocate(description))
            .collect();
        plan.subtasks = subtasks;
        plan
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Subtask> {
        self.subtasks.get_mut(index)
    }

    /// Number of leading subtasks with status `completed`.
    pub fn completed_prefix_len(&self) -> usize {
        self.subtasks
            .iter()
            .take_while(|subtask| subtask.status == SubtaskStatus::Completed)
            .count()
    }

    pub fn completed_prefix(&self) -> &[Subtask] {
        &self.subtasks[..self.completed_prefix_len()]
    }

    /// Everything after the completed prefix (in-progress, failed, and pending).
    pub fn remaining(&self) -> &[Subtask] {
        &self.subtasks[self.completed_prefix_len()..]
    }

    pub fn completed(&self) -> Vec<&Subtask> {
        self.subtasks
            .iter()
            .filter(|subtask| subtask.status == SubtaskStatus::Completed)
            .collect()
    }

    pub fn has_failed(&self) -> bool {
        self.subtasks
            .iter()
            .any(|subtask| subtask.status == SubtaskStatus::Failed)
    }

    /// Replace the suffix after the completed prefix with fresh pending subtasks.
    ///
    /// Returns `(old_remaining, new_remaining)`.
    pub fn replace_remaining<I, S>(&mut self, descriptions: I) -> (Vec<Subtask>, Vec<Subtask>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix_len = self.completed_prefix_len();
        let old_remaining = self.subtasks.split_off(prefix_len);
        let new_remaining: Vec<Subtask> = descriptions
            .into_iter()
            .map(|description| self.allocate(description))
            .collect();
        self.subtasks.extend(new_remaining.iter().cloned());
        (old_remaining, new_remaining)
    }

    fn allocate(&mut self, description: impl Into<String>) -> Subtask {
        let id = format!("t{}", self.next_id);
        self.next_id += 1;
        Subtask::pending(id, description)
    }
}
