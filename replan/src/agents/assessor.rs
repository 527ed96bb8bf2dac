//! Revision assessor: decides KEEP_PLAN / REVISE_PLAN / ABORT_TASK for an obstacle.

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::parse::{Assessment, parse_assessment};
use crate::core::types::{CallSite, Generation, Obstacle, Subtask};
use crate::io::generator::Generator;
use crate::io::prompt::AssessPrompt;

use super::AgentContext;
use super::policy::{CallOutcome, Fallbacks};

pub struct AssessInput<'a> {
    pub goal: &'a str,
    pub original_plan: &'a [Subtask],
    pub completed: &'a [Subtask],
    pub remaining: &'a [Subtask],
    pub obstacle: &'a Obstacle,
}

/// Ask for a decision. Exhaustion and tool-only answers fall back to KEEP_PLAN.
#[instrument(skip_all, fields(obstacle = input.obstacle.kind.as_str()))]
pub fn assess<G: Generator>(ctx: &AgentContext<'_, G>, input: &AssessInput<'_>) -> Result<Assessment> {
    let prompt = ctx.prompts.assess(&AssessPrompt {
        goal: input.goal,
        original_plan: input.original_plan,
        completed: input.completed,
        remaining: input.remaining,
        obstacle: input.obstacle,
    })?;
    let outcome = ctx.caller().call(
        CallSite::Assess,
        &prompt,
        |generation: &Generation| parse_assessment(&generation.text),
        Fallbacks::default_value(Assessment::keep_plan(
            "assessment unavailable after retries; keeping the plan",
        )),
    )?;
    let assessment = match outcome {
        CallOutcome::Usable(assessment) | CallOutcome::Degraded(assessment) => assessment,
        CallOutcome::Empty(_) => Assessment::keep_plan("assessor returned no text; keeping the plan"),
    };
    info!(decision = assessment.decision.as_str(), "assessment");
    Ok(assessment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ObstacleKind, RevisionDecision};
    use crate::test_support::{Harness, ScriptedGenerator, plan_with_statuses, text, tool_use, truncated};
    use crate::core::types::SubtaskStatus;
    use serde_json::json;

    fn run_assess(generator: &ScriptedGenerator) -> Assessment {
        let harness = Harness::new();
        let plan = plan_with_statuses(&[SubtaskStatus::Completed, SubtaskStatus::InProgress]);
        let obstacle = Obstacle::new(ObstacleKind::ToolFailure, "tool:save_draft: boom");
        assess(
            &harness.ctx(generator),
            &AssessInput {
                goal: "goal",
                original_plan: &plan.subtasks,
                completed: plan.completed_prefix(),
                remaining: plan.remaining(),
                obstacle: &obstacle,
            },
        )
        .expect("assess")
    }

    #[test]
    fn parses_revise_decision() {
        let generator = ScriptedGenerator::new([text(
            "ASSESSMENT: REVISE_PLAN\nREASONING: tool is down\nREVISED_PLAN:\n1. Write locally",
        )]);
        let assessment = run_assess(&generator);
        assert_eq!(assessment.decision, RevisionDecision::RevisePlan);
        assert_eq!(assessment.proposed_remaining, vec!["Write locally"]);
    }

    #[test]
    fn exhausted_retries_default_to_keep_plan() {
        let generator = ScriptedGenerator::new([truncated(), truncated(), truncated()]);
        let assessment = run_assess(&generator);
        assert_eq!(assessment.decision, RevisionDecision::KeepPlan);
        assert_eq!(generator.budgets(), vec![4096, 8192, 16384]);
    }

    #[test]
    fn tool_only_answer_keeps_plan() {
        let generator = ScriptedGenerator::new([tool_use("web_search", json!({"query": "x"}))]);
        let assessment = run_assess(&generator);
        assert_eq!(assessment.decision, RevisionDecision::KeepPlan);
        assert_eq!(generator.requests().len(), 1);
    }
}
