//! Plan compiler: goal → initial ordered subtask list.

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::core::parse::parse_plan;
use crate::core::types::{CallSite, Generation};
use crate::events::AgentEvent;
use crate::io::generator::Generator;
use crate::plan::Plan;

use super::AgentContext;
use super::policy::{CallOutcome, Fallbacks};

/// Compile `goal` into a plan of pending subtasks in source order.
///
/// Exhaustion is fatal (`GenerationExhausted`); an empty goal is rejected
/// before any call is made.
#[instrument(skip_all)]
pub fn compile_plan<G: Generator>(ctx: &AgentContext<'_, G>, goal: &str) -> Result<Plan> {
    let goal = goal.trim();
    if goal.is_empty() {
        bail!("goal must not be empty");
    }

    let prompt = ctx.prompts.plan(goal, &ctx.gateway.specs())?;
    let outcome = ctx.caller().call(
        CallSite::Plan,
        &prompt,
        |generation: &Generation| parse_plan(&generation.text),
        Fallbacks::none(),
    )?;
    let descriptions = match outcome {
        CallOutcome::Usable(list) | CallOutcome::Degraded(list) => list,
        CallOutcome::Empty(_) => bail!("plan call returned tool calls instead of a plan"),
    };

    let plan = Plan::new(goal, descriptions);
    info!(subtasks = plan.len(), "compiled plan");
    ctx.events.emit(&AgentEvent::PlanCompiled {
        subtasks: plan.len(),
    });
    Ok(plan)
}
