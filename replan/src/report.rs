//! Human-readable run summary (`summary.md` and `replan run` output).

use std::fmt::Write as _;

use crate::core::types::{SubtaskStatus, TerminalState};
use crate::run::RunReport;

/// Markdown summary: totals, executed subtasks, reflection cycles, revisions.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Run summary\n");
    let _ = writeln!(out, "Goal: {}", report.goal);
    let _ = match &report.terminal_state {
        TerminalState::Aborted { reason } => writeln!(out, "Outcome: aborted ({reason})"),
        state => writeln!(out, "Outcome: {}", state.as_str()),
    };
    let _ = writeln!(
        out,
        "Subtasks: {} planned, {} in final plan, {} completed",
        report.original_plan.len(),
        report.final_plan.len(),
        report.completed_subtasks()
    );
    let _ = writeln!(
        out,
        "Revisions: {}  Reflection cycles: {}  Duration: {} ms",
        report.revisions.len(),
        report.reflections.len(),
        report.duration_ms
    );

    let _ = writeln!(out, "\n## Execution\n");
    for (idx, subtask) in report.final_plan.subtasks.iter().enumerate() {
        let marker = match subtask.status {
            SubtaskStatus::Completed => "x",
            SubtaskStatus::Failed => "!",
            SubtaskStatus::InProgress => ">",
            SubtaskStatus::Pending => " ",
        };
        let _ = write!(out, "{}. [{marker}] {} ({})", idx + 1, subtask.description, subtask.id);
        if let Some(obstacle) = subtask.obstacle.as_ref().filter(|o| !o.is_none()) {
            let _ = write!(out, " - obstacle {}: {}", obstacle.kind.as_str(), obstacle.evidence);
        }
        out.push('\n');
    }

    if !report.reflections.is_empty() {
        let _ = writeln!(out, "\n## Reflection\n");
        for cycle in &report.reflections {
            let outcome = match (&cycle.refined_content, cycle.accepted) {
                (None, true) => "no issues",
                (Some(_), true) => "refined",
                (Some(_), false) => "refinement unchanged",
                (None, false) => "refinement unavailable",
            };
            let _ = writeln!(
                out,
                "- cycle {}: {outcome}; critique: {}",
                cycle.iteration,
                first_line(&cycle.critique)
            );
        }
    }

    if !report.revisions.is_empty() {
        let _ = writeln!(out, "\n## Revisions\n");
        for record in &report.revisions {
            let _ = writeln!(
                out,
                "### Revision {} ({})\n",
                record.sequence_number, record.timestamp
            );
            let _ = writeln!(
                out,
                "- trigger: {}: {}",
                record.triggering_obstacle.kind.as_str(),
                record.triggering_obstacle.evidence
            );
            if !record.reasoning.is_empty() {
                let _ = writeln!(out, "- reasoning: {}", record.reasoning);
            }
            if !record.notes.is_empty() {
                let _ = writeln!(out, "- notes: {}", record.notes);
            }
            let _ = writeln!(
                out,
                "- remaining: {} -> {} subtasks",
                record.old_remaining.len(),
                record.new_remaining.len()
            );
        }
    }
    out
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        Obstacle, ObstacleKind, ReflectionCycle, RevisionDecision, RevisionRecord,
    };
    use crate::plan::Plan;

    fn base_report() -> RunReport {
        let mut plan = Plan::new("goal", ["Search", "Summarize"]);
        plan.subtasks[0].status = SubtaskStatus::Completed;
        RunReport {
            goal: "goal".to_string(),
            original_plan: plan.clone(),
            final_plan: plan,
            terminal_state: TerminalState::Completed,
            synthesized: Some("text".to_string()),
            artifact: Some("text".to_string()),
            revisions: Vec::new(),
            reflections: Vec::new(),
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            duration_ms: 5,
        }
    }

    #[test]
    fn lists_subtasks_with_status_markers() {
        let summary = render_summary(&base_report());
        assert!(summary.contains("Outcome: completed"));
        assert!(summary.contains("1. [x] Search (t1)"));
        assert!(summary.contains("2. [ ] Summarize (t2)"));
        assert!(!summary.contains("## Revisions"));
    }

    #[test]
    fn includes_revisions_and_reflection() {
        let mut report = base_report();
        report.terminal_state = TerminalState::Aborted {
            reason: "revision cycle detected".to_string(),
        };
        report.revisions.push(RevisionRecord {
            sequence_number: 1,
            timestamp: "2026-01-01T00:00:01.000Z".to_string(),
            triggering_obstacle: Obstacle::new(ObstacleKind::ToolFailure, "tool:web_search: offline"),
            completed_prefix_snapshot: Vec::new(),
            old_remaining: report.final_plan.subtasks.clone(),
            new_remaining: Vec::new(),
            decision: RevisionDecision::RevisePlan,
            reasoning: "search is down".to_string(),
            notes: "dropped search".to_string(),
        });
        report.reflections.push(ReflectionCycle {
            iteration: 1,
            critique: "\nVERDICT: SATISFACTORY".to_string(),
            refined_content: None,
            accepted: true,
        });

        let summary = render_summary(&report);
        assert!(summary.contains("Outcome: aborted (revision cycle detected)"));
        assert!(summary.contains("- trigger: tool_failure: tool:web_search: offline"));
        assert!(summary.contains("- reasoning: search is down"));
        assert!(summary.contains("- remaining: 2 -> 0 subtasks"));
        assert!(summary.contains("- cycle 1: no issues; critique: VERDICT: SATISFACTORY"));
    }
}
