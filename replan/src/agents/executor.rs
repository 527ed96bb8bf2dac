//! Subtask executor: alternates reasoning calls and gateway invocations.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::types::{CallSite, Generation, Observation, StopReason, Subtask};
use crate::events::AgentEvent;
use crate::io::generator::Generator;
use crate::io::prompt::ExecutePrompt;

use super::AgentContext;
use super::policy::{CallOutcome, Fallbacks};

/// Line the model writes when the current subtask is finished.
pub const COMPLETION_MARKER: &str = "SUBTASK COMPLETE";

/// How a subtask's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub steps: u32,
    /// The model signalled completion.
    pub completed: bool,
    /// The step cap was hit without a completion signal.
    pub step_limit_reached: bool,
}

/// Execute `subtask` in place, appending one observation per result.
///
/// Stops when the model signals completion, when a reasoning call degrades
/// (recorded as an error observation), or at `subtask_max_steps`.
#[instrument(skip_all, fields(subtask = %subtask.id))]
pub fn execute_subtask<G: Generator>(
    ctx: &AgentContext<'_, G>,
    goal: &str,
    completed: &[Subtask],
    subtask: &mut Subtask,
) -> Result<ExecutionOutcome> {
    let max_steps = ctx.config.subtask_max_steps;
    let tools = ctx.gateway.specs();

    for step in 1..=max_steps {
        let prompt = ctx.prompts.execute(&ExecutePrompt {
            goal,
            completed,
            subtask: &*subtask,
            step,
            max_steps,
            tools: &tools,
        })?;
        let outcome = ctx.caller().call(
            CallSite::Execute,
            &prompt,
            |generation: &Generation| Ok(Some(generation.clone())),
            Fallbacks::default_value(None),
        )?;

        let generation = match outcome {
            CallOutcome::Usable(Some(generation)) | CallOutcome::Empty(generation) => generation,
            CallOutcome::Usable(None) | CallOutcome::Degraded(_) => {
                subtask.observations.push(Observation::reasoning_error(format!(
                    "reasoning unavailable: execute generation exhausted after {} attempts",
                    ctx.config.max_attempts
                )));
                return Ok(ExecutionOutcome {
                    steps: step,
                    completed: false,
                    step_limit_reached: false,
                });
            }
        };

        let (body, marked_complete) = split_completion_marker(&generation.text);
        if !body.is_empty() {
            subtask.observations.push(Observation::reasoning(body));
        }
        for call in &generation.tool_calls {
            let result = ctx.gateway.invoke(&call.name, &call.input);
            ctx.events.emit(&AgentEvent::ToolInvoked {
                subtask_id: subtask.id.clone(),
                tool: call.name.clone(),
                is_error: result.is_error(),
            });
            subtask
                .observations
                .push(Observation::tool(call.name.clone(), result));
        }

        let finished = marked_complete
            || (generation.stop_reason == StopReason::Completed && generation.tool_calls.is_empty());
        debug!(step, finished, tool_calls = generation.tool_calls.len(), "execute step");
        if finished {
            return Ok(ExecutionOutcome {
                steps: step,
                completed: true,
                step_limit_reached: false,
            });
        }
    }

    Ok(ExecutionOutcome {
        steps: max_steps,
        completed: false,
        step_limit_reached: true,
    })
}

/// Remove marker lines; report whether one was present.
fn split_completion_marker(text: &str) -> (String, bool) {
    let mut found = false;
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let is_marker = line.trim().trim_matches('*').eq_ignore_ascii_case(COMPLETION_MARKER);
            found |= is_marker;
            !is_marker
        })
        .collect();
    (kept.join("\n").trim().to_string(), found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ObservationSource, ToolCall, ToolResult};
    use crate::io::config::{AgentConfig, ToolsConfig};
    use crate::io::tools::build_gateway;
    use crate::test_support::{Harness, ScriptStep, ScriptedGenerator, text, tool_use, truncated};
    use serde_json::json;

    fn harness_with_tools(dir: &std::path::Path) -> Harness {
        let gateway = build_gateway(&ToolsConfig {
            output_dir: dir.to_path_buf(),
            commands: Vec::new(),
        })
        .expect("gateway");
        Harness::with_gateway(AgentConfig::default(), gateway)
    }

    #[test]
    fn completed_stop_without_tool_calls_finishes() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([text("Here are three headings.")]);
        let mut subtask = Subtask::pending("t1", "Draft headings");
        let outcome =
            execute_subtask(&harness.ctx(&generator), "goal", &[], &mut subtask).expect("execute");
        assert!(outcome.completed);
        assert_eq!(outcome.steps, 1);
        assert_eq!(subtask.output(), "Here are three headings.");
    }

    #[test]
    fn tool_calls_are_dispatched_until_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let harness = harness_with_tools(temp.path());
        let mut with_text = Generation::tool_use(vec![ToolCall {
            name: "save_draft".to_string(),
            input: json!({"content": "# Outline", "filename": "outline.md"}),
        }]);
        with_text.text = "Saving the outline.".to_string();
        let generator = ScriptedGenerator::new([
            ScriptStep::Respond(with_text),
            text("Saved.\nSUBTASK COMPLETE"),
        ]);
        let mut subtask = Subtask::pending("t1", "Save the outline");
        let outcome =
            execute_subtask(&harness.ctx(&generator), "goal", &[], &mut subtask).expect("execute");

        assert!(outcome.completed);
        assert_eq!(outcome.steps, 2);
        assert!(temp.path().join("outline.md").exists());
        let sources: Vec<ObservationSource> = subtask
            .observations
            .iter()
            .map(|o| o.source.clone())
            .collect();
        assert_eq!(
            sources,
            vec![
                ObservationSource::Reasoning,
                ObservationSource::Tool("save_draft".to_string()),
                ObservationSource::Reasoning,
            ]
        );
        assert_eq!(subtask.output(), "Saving the outline.\nSaved.");
    }

    #[test]
    fn gateway_errors_are_recorded_as_observations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let harness = harness_with_tools(temp.path());
        let generator = ScriptedGenerator::new([
            tool_use("save_draft", json!({"filename": "x.md"})),
            text("Could not save.\nSUBTASK COMPLETE"),
        ]);
        let mut subtask = Subtask::pending("t1", "Save");
        execute_subtask(&harness.ctx(&generator), "goal", &[], &mut subtask).expect("execute");
        assert_eq!(
            subtask.observations[0].result,
            ToolResult::error(
                "Missing required parameter 'content': the text to save must be provided"
            )
        );
        assert!(harness.sink.events().iter().any(|event| matches!(
            event,
            AgentEvent::ToolInvoked { is_error: true, .. }
        )));
    }

    #[test]
    fn step_cap_without_completion() {
        let mut config = AgentConfig::default();
        config.subtask_max_steps = 2;
        let harness = Harness::with_config(config);
        let generator = ScriptedGenerator::new([
            tool_use("web_search", json!({"query": "a"})),
            tool_use("web_search", json!({"query": "b"})),
        ]);
        let mut subtask = Subtask::pending("t1", "Search");
        let outcome =
            execute_subtask(&harness.ctx(&generator), "goal", &[], &mut subtask).expect("execute");
        assert!(outcome.step_limit_reached);
        assert!(!outcome.completed);
        assert_eq!(subtask.observations.len(), 2);
        assert!(subtask.observations.iter().all(|o| o.result.is_error()));
    }

    #[test]
    fn degraded_reasoning_becomes_error_observation() {
        let harness = Harness::new();
        let generator = ScriptedGenerator::new([truncated(), truncated(), truncated()]);
        let mut subtask = Subtask::pending("t1", "Think");
        let outcome =
            execute_subtask(&harness.ctx(&generator), "goal", &[], &mut subtask).expect("execute");
        assert!(!outcome.completed);
        assert!(!outcome.step_limit_reached);
        assert_eq!(subtask.observations.len(), 1);
        assert!(subtask.observations[0].result.is_error());
        assert_eq!(generator.budgets(), vec![4096, 8192, 16384]);
    }

    #[test]
    fn marker_lines_are_removed_from_output() {
        let (body, found) = split_completion_marker("Result text\n**SUBTASK COMPLETE**\n");
        assert!(found);
        assert_eq!(body, "Result text");
        let (_, found) = split_completion_marker("still going");
        assert!(!found);
    }
}
