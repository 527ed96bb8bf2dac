//! Synthesizer: merges completed subtask outputs into one artifact.

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::core::types::{CallSite, Subtask, SubtaskStatus};
use crate::io::generator::Generator;

use super::AgentContext;
use super::policy::{CallOutcome, Fallbacks, text_of};

/// Produce the artifact for `goal`. Exhaustion is fatal.
#[instrument(skip_all, fields(completed = completed.len()))]
pub fn synthesize<G: Generator>(
    ctx: &AgentContext<'_, G>,
    goal: &str,
    completed: &[Subtask],
) -> Result<String> {
    if completed.is_empty() {
        bail!("nothing to synthesize: no completed subtasks");
    }
    if let Some(subtask) = completed
        .iter()
        .find(|subtask| subtask.status != SubtaskStatus::Completed)
    {
        bail!(
            "cannot synthesize from {} subtask {}",
            subtask.status.as_str(),
            subtask.id
        );
    }

    let prompt = ctx.prompts.synthesize(goal, completed)?;
    let outcome = ctx
        .caller()
        .call(CallSite::Synthesize, &prompt, text_of, Fallbacks::none())?;
    let artifact = match outcome {
        CallOutcome::Usable(text) | CallOutcome::Degraded(text) => text,
        CallOutcome::Empty(_) => bail!("synthesis returned tool calls instead of an artifact"),
    };
    info!(bytes = artifact.len(), "synthesized artifact");
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::policy::GenerationExhausted;
    use crate::core::types::Observation;
    use crate::test_support::{Harness, ScriptStep, ScriptedGenerator, text, truncated};

    fn done(id: &str, output: &str) -> Subtask {
        let mut subtask = Subtask::pending(id, format!("work {id}"));
        subtask.status = SubtaskStatus::Completed;
        subtask.observations.push(Observation::reasoning(output));
        subtask
    }

    #[test]
    fn returns_trimmed_artifact() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([text("\n# Outline\n\n1. Intro\n")]);
        let artifact = synthesize(&harness.ctx(&generator), "goal", &[done("t1", "Intro")])
            .expect("synthesize");
        assert_eq!(artifact, "# Outline\n\n1. Intro");
        assert_eq!(generator.budgets(), vec![8192]);
        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("Intro"));
    }

    #[test]
    fn exhaustion_is_fatal() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([truncated(), truncated(), truncated()]);
        let err = synthesize(&harness.ctx(&generator), "goal", &[done("t1", "x")])
            .expect_err("fatal");
        let exhausted = err.downcast_ref::<GenerationExhausted>().expect("typed");
        assert_eq!(exhausted.site, CallSite::Synthesize);
        assert_eq!(exhausted.last_budget, 32768);
    }

    #[test]
    fn rejects_empty_input_without_calling() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new(Vec::<ScriptStep>::new());
        assert!(synthesize(&harness.ctx(&generator), "goal", &[]).is_err());
        assert!(generator.requests().is_empty());
    }
}
