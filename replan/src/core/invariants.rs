//! Semantic invariants of a live plan.

use crate::core::types::SubtaskStatus;
use crate::plan::Plan;
use std::collections::HashSet;

/// Check plan invariants:
/// - No duplicate ids
/// - No empty descriptions
/// - `completed` subtasks form a contiguous prefix
/// - At most one subtask is `in_progress`
pub fn validate_invariants(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (idx, subtask) in plan.subtasks.iter().enumerate() {
        if !seen.insert(subtask.id.as_str()) {
            errors.push(format!("duplicate id '{}' at position {}", subtask.id, idx + 1));
        }
        if subtask.description.trim().is_empty() {
            errors.push(format!("{}: description must not be empty", subtask.id));
        }
    }

    let prefix_len = plan.completed_prefix_len();
    if let Some(stray) = plan.subtasks[prefix_len..]
        .iter()
        .find(|subtask| subtask.status == SubtaskStatus::Completed)
    {
        errors.push(format!(
            "{}: completed subtask outside the completed prefix",
            stray.id
        ));
    }

    let in_progress = plan
        .subtasks
        .iter()
        .filter(|subtask| subtask.status == SubtaskStatus::InProgress)
        .count();
    if in_progress > 1 {
        errors.push(format!(
            "{in_progress} subtasks in_progress (at most one allowed)"
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::plan_with_statuses;

    #[test]
    fn valid_plan_has_no_errors() {
        let plan = plan_with_statuses(&[
            SubtaskStatus::Completed,
            SubtaskStatus::InProgress,
            SubtaskStatus::Pending,
        ]);
        assert!(validate_invariants(&plan).is_empty());
    }

    #[test]
    fn reports_duplicates_gaps_and_parallel_work() {
        let mut plan = plan_with_statuses(&[
            SubtaskStatus::InProgress,
            SubtaskStatus::Completed,
            SubtaskStatus::InProgress,
        ]);
        plan.subtasks[2].id = plan.subtasks[0].id.clone();
        plan.subtasks[1].description = "  ".to_string();

        let errors = validate_invariants(&plan);
        assert!(errors.iter().any(|err| err.contains("duplicate id")));
        assert!(errors.iter().any(|err| err.contains("description")));
        assert!(errors.iter().any(|err| err.contains("completed prefix")));
        assert!(errors.iter().any(|err| err.contains("in_progress")));
    }
}
