//! Deterministic selection logic for the live plan.

use crate::core::types::SubtaskStatus;
use crate::plan::Plan;

/// Index of the first subtask with status `pending`.
///
/// Returns `None` once no pending subtask remains. Callers must re-run this
/// after every revision because the plan may have changed underneath them.
pub fn first_pending(plan: &Plan) -> Option<usize> {
    plan.subtasks
        .iter()
        .position(|subtask| subtask.status == SubtaskStatus::Pending)
}
