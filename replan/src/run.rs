//! The execution loop: compile, execute, detect, assess, revise, then synthesize
//! and reflect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::AgentContext;
use crate::agents::assessor::{AssessInput, assess};
use crate::agents::executor::execute_subtask;
use crate::agents::planner::compile_plan;
use crate::agents::reflector::reflect;
use crate::agents::reviser::{RevisionOutcome, Reviser};
use crate::agents::synthesizer::synthesize;
use crate::core::cycle_guard::CycleGuard;
use crate::core::invariants::validate_invariants;
use crate::core::obstacle::ExecutionTrace;
use crate::core::selector::first_pending;
use crate::core::types::{
    Obstacle, ReflectionCycle, RevisionDecision, RevisionRecord, Subtask, SubtaskStatus,
    TerminalState,
};
use crate::events::AgentEvent;
use crate::io::generator::Generator;
use crate::plan::Plan;

/// Out-of-band cancellation, checked between subtasks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub goal: String,
    pub original_plan: Plan,
    pub final_plan: Plan,
    pub terminal_state: TerminalState,
    /// Artifact as synthesized, before reflection. Only for completed runs.
    pub synthesized: Option<String>,
    /// Final artifact after reflection. Only for completed runs.
    pub artifact: Option<String>,
    pub revisions: Vec<RevisionRecord>,
    pub reflections: Vec<ReflectionCycle>,
    /// RFC 3339 UTC start time.
    pub started_at: String,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn completed_subtasks(&self) -> usize {
        self.final_plan.completed().len()
    }
}

/// Run one task to a terminal state.
///
/// Aborted and cancelled runs are reports, not errors. `Err` means a fatal
/// generation failure (`GenerationExhausted`) or an internal invariant violation.
#[instrument(skip_all)]
pub fn run_task<G: Generator>(
    ctx: &AgentContext<'_, G>,
    goal: &str,
    cancel: &CancelFlag,
) -> Result<RunReport> {
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let clock = Instant::now();
    ctx.events.emit(&AgentEvent::RunStarted {
        goal: goal.trim().to_string(),
    });

    let mut plan = compile_plan(ctx, goal)?;
    let original_plan = plan.clone();
    let mut reviser = Reviser::new(CycleGuard::new(ctx.config.cycle_guard.clone()));

    let mut terminal_state = loop {
        if cancel.is_cancelled() {
            info!("run cancelled");
            break TerminalState::Cancelled;
        }
        let Some(index) = first_pending(&plan) else {
            break if plan.has_failed() {
                TerminalState::Aborted {
                    reason: "plan finished with failed subtasks".to_string(),
                }
            } else {
                TerminalState::Completed
            };
        };

        let step = run_subtask(ctx, &original_plan, &mut plan, index, &mut reviser)?;
        let violations = validate_invariants(&plan);
        if !violations.is_empty() {
            bail!("plan invariants violated: {}", violations.join("; "));
        }
        if let Some(state) = step {
            break state;
        }
    };

    if terminal_state == TerminalState::Completed && plan.completed().is_empty() {
        terminal_state = TerminalState::Aborted {
            reason: "plan completed without any completed subtasks".to_string(),
        };
    }

    let (synthesized, artifact, reflections) = if terminal_state == TerminalState::Completed {
        let completed: Vec<Subtask> = plan.completed().into_iter().cloned().collect();
        let synthesized = synthesize(ctx, &plan.goal, &completed)?;
        let reflection = reflect(ctx, &plan.goal, &synthesized)?;
        (
            Some(synthesized),
            Some(reflection.final_content),
            reflection.cycles,
        )
    } else {
        (None, None, Vec::new())
    };

    info!(state = terminal_state.as_str(), revisions = reviser.history().len(), "run finished");
    ctx.events.emit(&AgentEvent::RunFinished {
        state: terminal_state.as_str().to_string(),
    });
    Ok(RunReport {
        goal: plan.goal.clone(),
        original_plan,
        final_plan: plan,
        terminal_state,
        synthesized,
        artifact,
        revisions: reviser.into_history(),
        reflections,
        started_at,
        duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}

/// Execute the subtask at `index` and apply the resulting decision.
///
/// Returns `Some(state)` when the run must stop.
fn run_subtask<G: Generator>(
    ctx: &AgentContext<'_, G>,
    original_plan: &Plan,
    plan: &mut Plan,
    index: usize,
    reviser: &mut Reviser,
) -> Result<Option<TerminalState>> {
    let (done, rest) = plan.subtasks.split_at_mut(index);
    let Some(subtask) = rest.first_mut() else {
        bail!("no subtask at index {index}");
    };
    subtask.status = SubtaskStatus::InProgress;
    ctx.events.emit(&AgentEvent::SubtaskStarted {
        id: subtask.id.clone(),
        description: subtask.description.clone(),
    });

    let outcome = execute_subtask(ctx, &original_plan.goal, done, subtask)?;
    let obstacle = ctx.classifier.classify(&ExecutionTrace {
        observations: &subtask.observations,
        step_limit_reached: outcome.step_limit_reached,
    });
    let id = subtask.id.clone();

    if obstacle.is_none() {
        finish(ctx, plan, index, SubtaskStatus::Completed, None);
        return Ok(None);
    }

    warn!(subtask = %id, kind = obstacle.kind.as_str(), evidence = %obstacle.evidence, "obstacle");
    ctx.events.emit(&AgentEvent::ObstacleDetected {
        subtask_id: id.clone(),
        kind: obstacle.kind,
        evidence: obstacle.evidence.clone(),
    });
    subtask.obstacle = Some(obstacle.clone());

    let assessment = assess(
        ctx,
        &AssessInput {
            goal: &plan.goal,
            original_plan: &original_plan.subtasks,
            completed: plan.completed_prefix(),
            remaining: plan.remaining(),
            obstacle: &obstacle,
        },
    )?;
    ctx.events.emit(&AgentEvent::AssessmentMade {
        subtask_id: id.clone(),
        decision: assessment.decision,
    });

    match assessment.decision {
        RevisionDecision::KeepPlan => {
            finish(ctx, plan, index, SubtaskStatus::Completed, Some(obstacle));
            Ok(None)
        }
        RevisionDecision::AbortTask => {
            finish(ctx, plan, index, SubtaskStatus::Failed, Some(obstacle));
            let reason = if assessment.reasoning.trim().is_empty() {
                "assessor aborted the task".to_string()
            } else {
                assessment.reasoning
            };
            Ok(Some(TerminalState::Aborted { reason }))
        }
        RevisionDecision::RevisePlan => {
            let applied = reviser.history().len();
            if applied >= usize::try_from(ctx.config.max_revisions)? {
                finish(ctx, plan, index, SubtaskStatus::Failed, Some(obstacle));
                return Ok(Some(TerminalState::Aborted {
                    reason: format!("revision limit of {applied} reached"),
                }));
            }
            match reviser.revise(ctx, plan, &obstacle, &assessment)? {
                RevisionOutcome::Applied => {
                    emit_finished(ctx, &id, SubtaskStatus::Failed);
                    Ok(None)
                }
                RevisionOutcome::CycleDetected(reason) => {
                    emit_finished(ctx, &id, SubtaskStatus::Failed);
                    Ok(Some(TerminalState::Aborted { reason }))
                }
                RevisionOutcome::Degraded => {
                    info!(subtask = %id, "revision degraded; keeping the plan");
                    finish(ctx, plan, index, SubtaskStatus::Completed, Some(obstacle));
                    Ok(None)
                }
            }
        }
    }
}

fn finish<G: Generator>(
    ctx: &AgentContext<'_, G>,
    plan: &mut Plan,
    index: usize,
    status: SubtaskStatus,
    obstacle: Option<Obstacle>,
) {
    if let Some(subtask) = plan.get_mut(index) {
        subtask.status = status;
        if obstacle.is_some() {
            subtask.obstacle = obstacle;
        }
        emit_finished(ctx, &subtask.id, status);
    }
}

fn emit_finished<G: Generator>(ctx: &AgentContext<'_, G>, id: &str, status: SubtaskStatus) {
    ctx.events.emit(&AgentEvent::SubtaskFinished {
        id: id.to_string(),
        status,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Generation, GenerationRequest, ObstacleKind};
    use crate::test_support::{Harness, ScriptedGenerator, text};

    /// Raises `cancel` once `after` requests have been answered.
    struct CancelAfter {
        inner: ScriptedGenerator,
        cancel: CancelFlag,
        after: usize,
    }

    impl Generator for CancelAfter {
        fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
            let generation = self.inner.generate(request)?;
            if self.inner.requests().len() >= self.after {
                self.cancel.cancel();
            }
            Ok(generation)
        }
    }

    #[test]
    fn cancelled_before_first_subtask() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([text("1. Only step")]);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = run_task(&harness.ctx(&generator), "goal", &cancel).expect("run");
        assert_eq!(report.terminal_state, TerminalState::Cancelled);
        assert!(report.artifact.is_none());
        assert_eq!(report.final_plan.subtasks[0].status, SubtaskStatus::Pending);
    }

    #[test]
    fn cancel_takes_effect_at_the_next_subtask_boundary() {
        let harness = Harness::new();
        let cancel = CancelFlag::new();
        let generator = CancelAfter {
            inner: ScriptedGenerator::new([
                text("1. Gather notes\n2. Write summary"),
                text("Notes gathered."),
            ]),
            cancel: cancel.clone(),
            after: 2,
        };
        let report = run_task(&harness.ctx(&generator), "goal", &cancel).expect("run");

        assert_eq!(report.terminal_state, TerminalState::Cancelled);
        assert_eq!(report.final_plan.subtasks[0].status, SubtaskStatus::Completed);
        assert_eq!(report.final_plan.subtasks[1].status, SubtaskStatus::Pending);
        assert!(report.artifact.is_none());
        assert_eq!(generator.inner.remaining(), 0);
    }

    #[test]
    fn keep_plan_accepts_subtask_with_obstacle() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([
            text("1. Look up the release date"),
            text("BLOCKED: the release date is not published"),
            text("ASSESSMENT: KEEP_PLAN\nREASONING: the date is optional"),
            text("# Notes\nDate unknown."),
            text("VERDICT: SATISFACTORY"),
        ]);
        let report = run_task(&harness.ctx(&generator), "goal", &CancelFlag::new()).expect("run");
        assert_eq!(report.terminal_state, TerminalState::Completed);
        let subtask = &report.final_plan.subtasks[0];
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        assert_eq!(
            subtask.obstacle.as_ref().map(|o| o.kind),
            Some(ObstacleKind::InsufficientInformation)
        );
        assert!(report.revisions.is_empty());
        assert_eq!(report.artifact.as_deref(), Some("# Notes\nDate unknown."));
    }

    #[test]
    fn abort_decision_ends_run_without_artifact() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([
            text("1. Read the private archive"),
            text("BLOCKED: the archive requires credentials"),
            text("ASSESSMENT: ABORT_TASK\nREASONING: no way to get access"),
        ]);
        let report = run_task(&harness.ctx(&generator), "goal", &CancelFlag::new()).expect("run");
        assert_eq!(
            report.terminal_state,
            TerminalState::Aborted {
                reason: "no way to get access".to_string()
            }
        );
        assert_eq!(report.final_plan.subtasks[0].status, SubtaskStatus::Failed);
        assert!(report.synthesized.is_none());
        assert_eq!(generator.remaining(), 0);
    }
}
