//! Plan revision engine: replaces the remaining suffix and records the revision.

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::cycle_guard::{CycleGuard, revision_signature};
use crate::core::immutability::check_prefix_snapshot;
use crate::core::parse::{Assessment, parse_revised_remaining};
use crate::core::types::{
    CallSite, Generation, Obstacle, RevisionDecision, RevisionRecord, SubtaskStatus,
};
use crate::events::AgentEvent;
use crate::io::generator::Generator;
use crate::io::prompt::RevisePrompt;
use crate::plan::Plan;

use super::AgentContext;
use super::policy::{CallOutcome, Fallbacks};

/// What happened to a requested revision.
#[derive(Debug, Clone, PartialEq)]
pub enum RevisionOutcome {
    /// The suffix was replaced; the record is the last entry of the history.
    Applied,
    /// No replacement list could be produced; the plan is untouched.
    Degraded,
    /// Applied, but the same revision keeps coming back. The run must abort.
    CycleDetected(String),
}

/// Revision state owned by one run: the append-only history and the cycle guard.
#[derive(Debug)]
pub struct Reviser {
    history: Vec<RevisionRecord>,
    guard: CycleGuard,
}

impl Reviser {
    pub fn new(guard: CycleGuard) -> Self {
        Self {
            history: Vec::new(),
            guard,
        }
    }

    pub fn history(&self) -> &[RevisionRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RevisionRecord> {
        self.history
    }

    /// Replace everything after the completed prefix of `plan`.
    ///
    /// The subtask that hit `obstacle` must be the first non-completed one. It is
    /// marked `failed` and travels into the record's `old_remaining`. The new list
    /// comes from the assessment when it proposed one, otherwise from a separate
    /// generative call (which may answer `PLAN COMPLETE`, leaving no remaining work).
    #[instrument(skip_all, fields(obstacle = obstacle.kind.as_str()))]
    pub fn revise<G: Generator>(
        &mut self,
        ctx: &AgentContext<'_, G>,
        plan: &mut Plan,
        obstacle: &Obstacle,
        assessment: &Assessment,
    ) -> Result<RevisionOutcome> {
        let new_descriptions = if assessment.proposed_remaining.is_empty() {
            match self.generate_remaining(ctx, plan, obstacle, assessment)? {
                Some(list) => list,
                None => return Ok(RevisionOutcome::Degraded),
            }
        } else {
            assessment.proposed_remaining.clone()
        };

        let prefix_len = plan.completed_prefix_len();
        let Some(failing) = plan.get_mut(prefix_len) else {
            bail!("revision requested with no remaining subtasks");
        };
        failing.status = SubtaskStatus::Failed;
        failing.obstacle = Some(obstacle.clone());

        let snapshot = plan.completed_prefix().to_vec();
        let (old_remaining, new_remaining) = plan.replace_remaining(new_descriptions.iter());
        let violations = check_prefix_snapshot(&snapshot, plan);
        if !violations.is_empty() {
            bail!("revision changed completed work: {}", violations.join("; "));
        }

        let sequence_number = u32::try_from(self.history.len() + 1)?;
        let record = RevisionRecord {
            sequence_number,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            triggering_obstacle: obstacle.clone(),
            completed_prefix_snapshot: snapshot,
            old_remaining,
            new_remaining,
            decision: RevisionDecision::RevisePlan,
            reasoning: assessment.reasoning.clone(),
            notes: assessment.notes.clone(),
        };
        info!(
            sequence_number,
            removed = record.old_remaining.len(),
            added = record.new_remaining.len(),
            "plan revised"
        );
        ctx.events.emit(&AgentEvent::PlanRevised {
            sequence_number,
            removed: record.old_remaining.len(),
            added: record.new_remaining.len(),
        });
        self.history.push(record);

        let signature = revision_signature(obstacle.kind, &new_descriptions);
        if let Some(reason) = self.guard.record(signature) {
            warn!(%reason, "revision cycle");
            return Ok(RevisionOutcome::CycleDetected(reason));
        }
        Ok(RevisionOutcome::Applied)
    }

    fn generate_remaining<G: Generator>(
        &self,
        ctx: &AgentContext<'_, G>,
        plan: &Plan,
        obstacle: &Obstacle,
        assessment: &Assessment,
    ) -> Result<Option<Vec<String>>> {
        let prompt = ctx.prompts.revise(&RevisePrompt {
            goal: &plan.goal,
            completed: plan.completed_prefix(),
            remaining: plan.remaining(),
            obstacle,
            reasoning: &assessment.reasoning,
        })?;
        let outcome = ctx.caller().call(
            CallSite::Revise,
            &prompt,
            |generation: &Generation| parse_revised_remaining(&generation.text).map(Some),
            Fallbacks::default_value(None),
        )?;
        Ok(match outcome {
            CallOutcome::Usable(list) | CallOutcome::Degraded(list) => list,
            CallOutcome::Empty(_) => None,
        })
    }
}
