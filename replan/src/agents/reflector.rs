//! Reflector: bounded critique/refine loop over the synthesized artifact.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::parse::{Verdict, parse_verdict};
use crate::core::types::{CallSite, Generation, ReflectionCycle};
use crate::events::AgentEvent;
use crate::io::generator::Generator;

use super::AgentContext;
use super::policy::{CallOutcome, Fallbacks, text_of};

const NO_ISSUES: &str = "no issues found";

/// Consecutive cycles without a content change that end the loop.
const MAX_UNCHANGED_CYCLES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub cycles: Vec<ReflectionCycle>,
    pub final_content: String,
}

/// Critique and refine `content` for at most `reflection_max_iterations` cycles.
///
/// Never fails on generation trouble: a degraded critique counts as "no issues"
/// and a degraded refinement keeps the previous content.
#[instrument(skip_all, fields(max_iterations = ctx.config.reflection_max_iterations))]
pub fn reflect<G: Generator>(
    ctx: &AgentContext<'_, G>,
    goal: &str,
    content: &str,
) -> Result<Reflection> {
    let mut cycles = Vec::new();
    let mut current = content.to_string();
    let mut unchanged = 0;

    for iteration in 1..=ctx.config.reflection_max_iterations {
        let (verdict, critique) = critique(ctx, goal, &current)?;
        if verdict == Verdict::Satisfactory {
            push_cycle(ctx, &mut cycles, ReflectionCycle {
                iteration,
                critique,
                refined_content: None,
                accepted: true,
            });
            break;
        }

        let refined = refine(ctx, goal, &current, &critique)?;
        let changed = refined
            .as_deref()
            .is_some_and(|text| text.trim() != current.trim());
        if changed && let Some(text) = &refined {
            current.clone_from(text);
            unchanged = 0;
        } else {
            unchanged += 1;
        }
        push_cycle(ctx, &mut cycles, ReflectionCycle {
            iteration,
            critique,
            refined_content: refined,
            accepted: changed,
        });
        if unchanged >= MAX_UNCHANGED_CYCLES {
            debug!(iteration, "refinement stopped changing the artifact");
            break;
        }
    }

    info!(cycles = cycles.len(), "reflection finished");
    Ok(Reflection {
        cycles,
        final_content: current,
    })
}

fn critique<G: Generator>(
    ctx: &AgentContext<'_, G>,
    goal: &str,
    content: &str,
) -> Result<(Verdict, String)> {
    let prompt = ctx.prompts.critique(goal, content)?;
    let outcome = ctx.caller().call(
        CallSite::Critique,
        &prompt,
        |generation: &Generation| {
            let verdict = parse_verdict(&generation.text)?;
            Ok((verdict, generation.text.trim().to_string()))
        },
        Fallbacks::default_value((Verdict::Satisfactory, NO_ISSUES.to_string())),
    )?;
    Ok(match outcome {
        CallOutcome::Usable(found) | CallOutcome::Degraded(found) => found,
        CallOutcome::Empty(_) => (Verdict::Satisfactory, NO_ISSUES.to_string()),
    })
}

/// `Some(text)` when the model produced a refinement, `None` when it did not.
fn refine<G: Generator>(
    ctx: &AgentContext<'_, G>,
    goal: &str,
    content: &str,
    critique: &str,
) -> Result<Option<String>> {
    let prompt = ctx.prompts.refine(goal, content, critique)?;
    let outcome = ctx.caller().call(
        CallSite::Refine,
        &prompt,
        |generation: &Generation| text_of(generation).map(Some),
        Fallbacks::previous(None),
    )?;
    Ok(match outcome {
        CallOutcome::Usable(text) => text,
        CallOutcome::Degraded(_) | CallOutcome::Empty(_) => None,
    })
}

fn push_cycle<G: Generator>(
    ctx: &AgentContext<'_, G>,
    cycles: &mut Vec<ReflectionCycle>,
    cycle: ReflectionCycle,
) {
    ctx.events.emit(&AgentEvent::ReflectionCycle {
        iteration: cycle.iteration,
        refined: cycle.refined_content.is_some(),
        accepted: cycle.accepted,
    });
    cycles.push(cycle);
}
