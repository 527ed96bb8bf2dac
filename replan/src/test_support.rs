//! Test-only fakes and builders shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::agents::AgentContext;
use crate::core::obstacle::KeywordClassifier;
use crate::core::types::{Generation, GenerationRequest, StopReason, SubtaskStatus, ToolCall};
use crate::events::{AgentEvent, EventSink};
use crate::io::config::AgentConfig;
use crate::io::gateway::Gateway;
use crate::io::generator::Generator;
use crate::io::prompt::PromptEngine;
use crate::plan::Plan;

/// One scripted generator response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(Generation),
    /// Transport failure with this message.
    Fail(String),
}

impl From<Generation> for ScriptStep {
    fn from(generation: Generation) -> Self {
        ScriptStep::Respond(generation)
    }
}

/// Generator that replays a fixed script and records every request.
///
/// Running past the end of the script is a transport error, so tests notice
/// unexpected extra calls.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: RefCell<VecDeque<ScriptStep>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ScriptStep>,
    {
        Self {
            script: RefCell::new(steps.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }

    /// Token budgets of every request, in call order.
    pub fn budgets(&self) -> Vec<u32> {
        self.requests.borrow().iter().map(|r| r.max_tokens).collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.requests.borrow_mut().push(request.clone());
        match self.script.borrow_mut().pop_front() {
            Some(ScriptStep::Respond(generation)) => Ok(generation),
            Some(ScriptStep::Fail(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted generator exhausted")),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RefCell<Vec<AgentEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.borrow().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AgentEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Completed response with text.
pub fn text(body: &str) -> ScriptStep {
    ScriptStep::Respond(Generation::completed(body))
}

/// Response cut off by the token budget.
pub fn truncated() -> ScriptStep {
    ScriptStep::Respond(Generation {
        text: "partial".to_string(),
        stop_reason: StopReason::MaxTokens,
        tool_calls: Vec::new(),
    })
}

/// Response carrying only tool calls.
pub fn tool_use(name: &str, input: Value) -> ScriptStep {
    ScriptStep::Respond(Generation::tool_use(vec![ToolCall {
        name: name.to_string(),
        input,
    }]))
}

pub fn fail(message: &str) -> ScriptStep {
    ScriptStep::Fail(message.to_string())
}

/// Plan with one subtask per status, described `step 1`, `step 2`, ...
pub fn plan_with_statuses(statuses: &[SubtaskStatus]) -> Plan {
    let mut plan = Plan::new(
        "goal",
        (1..=statuses.len()).map(|n| format!("step {n}")),
    );
    for (subtask, status) in plan.subtasks.iter_mut().zip(statuses) {
        subtask.status = *status;
    }
    plan
}

/// Owns everything an [`AgentContext`] borrows except the generator.
pub struct Harness {
    pub config: AgentConfig,
    pub gateway: Gateway,
    pub classifier: KeywordClassifier,
    pub sink: RecordingSink,
    pub prompts: PromptEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AgentConfig::default())
    }

    pub fn with_config(config: AgentConfig) -> Self {
        Self::with_gateway(config, Gateway::new())
    }

    pub fn with_gateway(config: AgentConfig, gateway: Gateway) -> Self {
        Self {
            classifier: KeywordClassifier::new(config.obstacles.clone()),
            config,
            gateway,
            sink: RecordingSink::default(),
            prompts: PromptEngine::new().expect("embedded templates compile"),
        }
    }

    pub fn ctx<'a, G: Generator>(&'a self, generator: &'a G) -> AgentContext<'a, G> {
        AgentContext {
            generator,
            gateway: &self.gateway,
            classifier: &self.classifier,
            events: &self.sink,
            prompts: &self.prompts,
            config: &self.config,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
