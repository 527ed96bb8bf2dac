//! Prompt rendering for every generative call site.
//!
//! Templates live in `prompts/*.md` and are compiled into the binary. Wording
//! stays in the templates; this module only shapes the data they see and keeps
//! the rendered text within a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::{Obstacle, Subtask};
use crate::io::gateway::ToolSpec;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const EXECUTE_TEMPLATE: &str = include_str!("prompts/execute.md");
const ASSESS_TEMPLATE: &str = include_str!("prompts/assess.md");
const REVISE_TEMPLATE: &str = include_str!("prompts/revise.md");
const SYNTHESIZE_TEMPLATE: &str = include_str!("prompts/synthesize.md");
const CRITIQUE_TEMPLATE: &str = include_str!("prompts/critique.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");

/// Default ceiling for one rendered prompt.
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 120_000;

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 4] = ["tools", "original_plan", "completed", "history"];

#[derive(Debug, Clone, Serialize)]
struct SubtaskView {
    number: usize,
    id: String,
    description: String,
    status: &'static str,
    output: String,
    obstacle: Option<String>,
}

impl SubtaskView {
    fn list(subtasks: &[Subtask]) -> Vec<Self> {
        subtasks
            .iter()
            .enumerate()
            .map(|(idx, subtask)| Self {
                number: idx + 1,
                id: subtask.id.clone(),
                description: subtask.description.clone(),
                status: subtask.status.as_str(),
                output: subtask.output().trim().to_string(),
                obstacle: subtask
                    .obstacle
                    .as_ref()
                    .filter(|obstacle| !obstacle.is_none())
                    .map(describe_obstacle),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
struct ObservationView {
    label: String,
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct ToolView<'a> {
    name: &'a str,
    description: &'a str,
    required: Vec<&'a str>,
}

fn tool_views<'a>(tools: &[&'a ToolSpec]) -> Vec<ToolView<'a>> {
    tools
        .iter()
        .map(|spec| ToolView {
            name: &spec.name,
            description: &spec.description,
            required: spec.required.iter().map(|f| f.name.as_str()).collect(),
        })
        .collect()
}

fn describe_obstacle(obstacle: &Obstacle) -> String {
    format!("{}: {}", obstacle.kind.as_str(), obstacle.evidence)
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        Self::with_budget(DEFAULT_PROMPT_BUDGET_BYTES)
    }

    pub fn with_budget(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        for (name, source) in [
            ("plan", PLAN_TEMPLATE),
            ("execute", EXECUTE_TEMPLATE),
            ("assess", ASSESS_TEMPLATE),
            ("revise", REVISE_TEMPLATE),
            ("synthesize", SYNTHESIZE_TEMPLATE),
            ("critique", CRITIQUE_TEMPLATE),
            ("refine", REFINE_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env, budget_bytes })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self
            .env
            .get_template(name)?
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        Ok(fit_to_budget(&rendered, self.budget_bytes))
    }

    pub fn plan(&self, goal: &str, tools: &[&ToolSpec]) -> Result<String> {
        self.render(
            "plan",
            context! {
                goal => goal.trim(),
                tools => tool_views(tools),
            },
        )
    }

    pub fn execute(&self, input: &ExecutePrompt<'_>) -> Result<String> {
        let history: Vec<ObservationView> = input
            .subtask
            .observations
            .iter()
            .map(|obs| ObservationView {
                label: obs.label(),
                text: obs.result.render(),
            })
            .collect();
        self.render(
            "execute",
            context! {
                goal => input.goal.trim(),
                completed => SubtaskView::list(input.completed),
                subtask => input.subtask.description.trim(),
                step => input.step,
                max_steps => input.max_steps,
                history => history,
                tools => tool_views(input.tools),
            },
        )
    }

    pub fn assess(&self, input: &AssessPrompt<'_>) -> Result<String> {
        self.render(
            "assess",
            context! {
                goal => input.goal.trim(),
                original_plan => SubtaskView::list(input.original_plan),
                completed => SubtaskView::list(input.completed),
                remaining => SubtaskView::list(input.remaining),
                obstacle => describe_obstacle(input.obstacle),
            },
        )
    }

    pub fn revise(&self, input: &RevisePrompt<'_>) -> Result<String> {
        self.render(
            "revise",
            context! {
                goal => input.goal.trim(),
                completed => SubtaskView::list(input.completed),
                remaining => SubtaskView::list(input.remaining),
                obstacle => describe_obstacle(input.obstacle),
                reasoning => Some(input.reasoning.trim()).filter(|s| !s.is_empty()),
            },
        )
    }

    pub fn synthesize(&self, goal: &str, completed: &[Subtask]) -> Result<String> {
        self.render(
            "synthesize",
            context! {
                goal => goal.trim(),
                completed => SubtaskView::list(completed),
            },
        )
    }

    pub fn critique(&self, goal: &str, content: &str) -> Result<String> {
        self.render(
            "critique",
            context! {
                goal => goal.trim(),
                content => content.trim(),
            },
        )
    }

    pub fn refine(&self, goal: &str, content: &str, critique: &str) -> Result<String> {
        self.render(
            "refine",
            context! {
                goal => goal.trim(),
                content => content.trim(),
                critique => critique.trim(),
            },
        )
    }
}

pub struct ExecutePrompt<'a> {
    pub goal: &'a str,
    pub completed: &'a [Subtask],
    pub subtask: &'a Subtask,
    pub step: u32,
    pub max_steps: u32,
    pub tools: &'a [&'a ToolSpec],
}

pub struct AssessPrompt<'a> {
    pub goal: &'a str,
    pub original_plan: &'a [Subtask],
    pub completed: &'a [Subtask],
    pub remaining: &'a [Subtask],
    pub obstacle: &'a Obstacle,
}

pub struct RevisePrompt<'a> {
    pub goal: &'a str,
    pub completed: &'a [Subtask],
    pub remaining: &'a [Subtask],
    pub obstacle: &'a Obstacle,
    pub reasoning: &'a str,
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    droppable: bool,
    content: String,
}

/// Split on `<!-- section:KEY required|droppable -->` markers.
///
/// Text before the first marker becomes a required `preamble` section.
fn parse_sections(rendered: &str) -> Vec<Section> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let mut sections = Vec::new();
    let mut cursor = 0;
    let mut pending = ("preamble".to_string(), false);
    for caps in SECTION_RE.captures_iter(rendered) {
        let Some(marker) = caps.get(0) else { continue };
        push_section(&mut sections, &pending, &rendered[cursor..marker.start()]);
        pending = (
            caps.get(1).map_or("", |m| m.as_str()).to_string(),
            caps.get(2).is_some_and(|m| m.as_str() == "droppable"),
        );
        cursor = marker.end();
    }
    push_section(&mut sections, &pending, &rendered[cursor..]);
    sections
}

fn push_section(sections: &mut Vec<Section>, (key, droppable): &(String, bool), text: &str) {
    let content = text.trim();
    if !content.is_empty() {
        sections.push(Section {
            key: key.clone(),
            droppable: *droppable,
            content: content.to_string(),
        });
    }
}

/// Drop droppable sections in [`DROP_ORDER`] until the prompt fits; then clip the tail.
fn fit_to_budget(rendered: &str, budget: usize) -> String {
    let mut sections = parse_sections(rendered);
    let total = |secs: &[Section]| -> usize { secs.iter().map(|s| s.content.len() + 2).sum() };

    for key in DROP_ORDER {
        if total(&sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && s.droppable) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }

    let mut joined = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.len() > budget {
        let mut cut = budget.saturating_sub(12);
        while cut > 0 && !joined.is_char_boundary(cut) {
            cut -= 1;
        }
        joined.truncate(cut);
        joined.push_str("\n[truncated]");
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Observation, ObstacleKind, SubtaskStatus, ToolResult};
    use crate::io::gateway::RequiredField;
    use serde_json::json;

    fn save_draft_spec() -> ToolSpec {
        ToolSpec {
            name: "save_draft".to_string(),
            description: "Save a draft".to_string(),
            required: vec![RequiredField::new("content", "text")],
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn all_templates_render() {
        let engine = PromptEngine::new().expect("engine");
        let spec = save_draft_spec();
        let mut done = Subtask::pending("t1", "Research the topic");
        done.status = SubtaskStatus::Completed;
        done.observations.push(Observation::reasoning("Found three sources."));
        let pending = Subtask::pending("t2", "Write the outline");
        let obstacle = Obstacle::new(ObstacleKind::ToolFailure, "tool:save_draft: boom");

        let plan = engine.plan("write a 3-step outline", &[&spec]).expect("plan");
        assert!(plan.contains("write a 3-step outline"));
        assert!(plan.contains("save_draft"));

        let execute = engine
            .execute(&ExecutePrompt {
                goal: "goal",
                completed: std::slice::from_ref(&done),
                subtask: &pending,
                step: 1,
                max_steps: 10,
                tools: &[&spec],
            })
            .expect("execute");
        assert!(execute.contains("Write the outline"));
        assert!(execute.contains("Found three sources."));
        assert!(execute.contains("SUBTASK COMPLETE"));

        let assess = engine
            .assess(&AssessPrompt {
                goal: "goal",
                original_plan: &[done.clone(), pending.clone()],
                completed: std::slice::from_ref(&done),
                remaining: std::slice::from_ref(&pending),
                obstacle: &obstacle,
            })
            .expect("assess");
        assert!(assess.contains("ASSESSMENT:"));
        assert!(assess.contains("tool_failure"));

        let revise = engine
            .revise(&RevisePrompt {
                goal: "goal",
                completed: std::slice::from_ref(&done),
                remaining: std::slice::from_ref(&pending),
                obstacle: &obstacle,
                reasoning: "",
            })
            .expect("revise");
        assert!(revise.contains("PLAN COMPLETE"));

        let synth = engine
            .synthesize("goal", std::slice::from_ref(&done))
            .expect("synthesize");
        assert!(synth.contains("Found three sources."));

        assert!(engine.critique("goal", "draft").expect("critique").contains("VERDICT:"));
        assert!(engine.refine("goal", "draft", "too short").expect("refine").contains("too short"));
    }

    #[test]
    fn history_renders_tool_errors() {
        let engine = PromptEngine::new().expect("engine");
        let mut subtask = Subtask::pending("t1", "Save the draft");
        subtask.observations.push(Observation::tool(
            "save_draft",
            ToolResult::error("Missing required parameter 'content': text"),
        ));
        let prompt = engine
            .execute(&ExecutePrompt {
                goal: "goal",
                completed: &[],
                subtask: &subtask,
                step: 2,
                max_steps: 10,
                tools: &[],
            })
            .expect("execute");
        assert!(prompt.contains("tool:save_draft"));
        assert!(prompt.contains("error: Missing required parameter 'content'"));
    }

    #[test]
    fn budget_drops_droppable_sections_first() {
        let rendered = "intro\n<!-- section:tools droppable -->\nTOOLS LIST\n<!-- section:task required -->\nDo the thing";
        let fitted = fit_to_budget(rendered, 25);
        assert!(!fitted.contains("TOOLS LIST"));
        assert!(fitted.contains("Do the thing"));
        assert!(fitted.starts_with("intro"));
    }

    #[test]
    fn budget_clips_when_required_sections_overflow() {
        let rendered = format!("<!-- section:task required -->\n{}", "x".repeat(100));
        let fitted = fit_to_budget(&rendered, 40);
        assert!(fitted.len() <= 40);
        assert!(fitted.ends_with("[truncated]"));
    }
}
