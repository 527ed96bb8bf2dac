//! Completed-prefix immutability checks.

use crate::core::types::{Subtask, SubtaskStatus};
use crate::plan::Plan;

/// Validate that the completed prefix of `prev` survives unchanged in `next`.
///
/// For each completed subtask at position `i` of `prev`'s prefix, this enforces:
/// - `next` still has a subtask at position `i`.
/// - It is identical by value (id, description, status, observations, obstacle).
///
/// Returns a list of stable error messages in prefix order.
pub fn check_completed_prefix(prev: &Plan, next: &Plan) -> Vec<String> {
    check_prefix_snapshot(prev.completed_prefix(), next)
}

/// Same check against a previously captured prefix snapshot.
pub fn check_prefix_snapshot(snapshot: &[Subtask], next: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    for (idx, kept) in snapshot.iter().enumerate() {
        match next.subtasks.get(idx) {
            None => errors.push(format!("completed subtask '{}' missing in next plan", kept.id)),
            Some(candidate) if candidate.id != kept.id => errors.push(format!(
                "completed subtask '{}' moved (position {} now holds '{}')",
                kept.id,
                idx + 1,
                candidate.id
            )),
            Some(candidate) if candidate.status != SubtaskStatus::Completed => {
                errors.push(format!(
                    "completed subtask '{}' changed status to {}",
                    kept.id,
                    candidate.status.as_str()
                ));
            }
            Some(candidate) if candidate != kept => {
                errors.push(format!("completed subtask '{}' changed in next plan", kept.id));
            }
            Some(_) => {}
        }
    }
    errors
}
