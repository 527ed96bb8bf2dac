//! Shared deterministic types for the plan/execute/revise engine.
//!
//! These types define stable contracts between core components. They carry no
//! I/O and serialize to the JSON written under a run's artifact directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a single subtask. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubtaskStatus::Completed | SubtaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        }
    }
}

/// Result of one tool invocation, as returned by the capability gateway.
///
/// Serializes as `{"status":"ok","payload":...}` or `{"status":"error","message":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    Ok { payload: Value },
    Error { message: String },
}

impl ToolResult {
    pub fn ok(payload: impl Into<Value>) -> Self {
        ToolResult::Ok {
            payload: payload.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolResult::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error { .. })
    }

    /// Compact single-line rendering used in prompts and summaries.
    pub fn render(&self) -> String {
        match self {
            ToolResult::Ok { payload } => match payload {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
            ToolResult::Error { message } => format!("error: {message}"),
        }
    }
}

/// Where an observation came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    /// Text produced by a generative reasoning call.
    Reasoning,
    /// Result of a gateway invocation of the named tool.
    Tool(String),
}

/// One recorded result during subtask execution. Append-only per subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source: ObservationSource,
    pub result: ToolResult,
}

impl Observation {
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::Reasoning,
            result: ToolResult::ok(Value::String(text.into())),
        }
    }

    /// A reasoning step that produced no usable text (generation exhausted).
    pub fn reasoning_error(message: impl Into<String>) -> Self {
        Self {
            source: ObservationSource::Reasoning,
            result: ToolResult::error(message),
        }
    }

    pub fn tool(name: impl Into<String>, result: ToolResult) -> Self {
        Self {
            source: ObservationSource::Tool(name.into()),
            result,
        }
    }

    /// Reasoning text, if this is a successful reasoning observation.
    pub fn reasoning_text(&self) -> Option<&str> {
        match (&self.source, &self.result) {
            (ObservationSource::Reasoning, ToolResult::Ok { payload }) => payload.as_str(),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match &self.source {
            ObservationSource::Reasoning => "reasoning".to_string(),
            ObservationSource::Tool(name) => format!("tool:{name}"),
        }
    }
}

/// Classification of an impediment found in a subtask's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    ToolFailure,
    InsufficientInformation,
    Contradiction,
    IterationLimitReached,
    None,
}

impl ObstacleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObstacleKind::ToolFailure => "tool_failure",
            ObstacleKind::InsufficientInformation => "insufficient_information",
            ObstacleKind::Contradiction => "contradiction",
            ObstacleKind::IterationLimitReached => "iteration_limit_reached",
            ObstacleKind::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obstacle {
    pub kind: ObstacleKind,
    pub evidence: String,
}

impl Obstacle {
    pub fn new(kind: ObstacleKind, evidence: impl Into<String>) -> Self {
        Self {
            kind,
            evidence: evidence.into(),
        }
    }

    pub fn none() -> Self {
        Self::new(ObstacleKind::None, "")
    }

    pub fn is_none(&self) -> bool {
        self.kind == ObstacleKind::None
    }
}

/// A unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    pub observations: Vec<Observation>,
    /// Obstacle that drove the last decision about this subtask, if any.
    pub obstacle: Option<Obstacle>,
}

impl Subtask {
    pub fn pending(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: SubtaskStatus::Pending,
            observations: Vec::new(),
            obstacle: None,
        }
    }

    /// Reasoning text produced while executing this subtask, in order.
    pub fn output(&self) -> String {
        self.observations
            .iter()
            .filter_map(Observation::reasoning_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decision of the revision assessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionDecision {
    KeepPlan,
    RevisePlan,
    AbortTask,
}

impl RevisionDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            RevisionDecision::KeepPlan => "KEEP_PLAN",
            RevisionDecision::RevisePlan => "REVISE_PLAN",
            RevisionDecision::AbortTask => "ABORT_TASK",
        }
    }
}

/// Immutable audit entry appended by the plan revision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub sequence_number: u32,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub triggering_obstacle: Obstacle,
    pub completed_prefix_snapshot: Vec<Subtask>,
    pub old_remaining: Vec<Subtask>,
    pub new_remaining: Vec<Subtask>,
    pub decision: RevisionDecision,
    pub reasoning: String,
    pub notes: String,
}

/// One critique-then-refine pass over the synthesized artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionCycle {
    pub iteration: u32,
    pub critique: String,
    /// Refined artifact produced in this cycle; `None` when no refinement ran.
    pub refined_content: Option<String>,
    /// True when the cycle's outcome was taken as the new current content.
    pub accepted: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Aborted { reason: String },
    Cancelled,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Completed => "completed",
            TerminalState::Aborted { .. } => "aborted",
            TerminalState::Cancelled => "cancelled",
        }
    }
}

/// Each place in the engine that calls the generative capability.
///
/// Budgets and degradation policies are configured per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    Plan,
    Execute,
    Assess,
    Revise,
    Synthesize,
    Critique,
    Refine,
}

impl CallSite {
    pub const ALL: [CallSite; 7] = [
        CallSite::Plan,
        CallSite::Execute,
        CallSite::Assess,
        CallSite::Revise,
        CallSite::Synthesize,
        CallSite::Critique,
        CallSite::Refine,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CallSite::Plan => "plan",
            CallSite::Execute => "execute",
            CallSite::Assess => "assess",
            CallSite::Revise => "revise",
            CallSite::Synthesize => "synthesize",
            CallSite::Critique => "critique",
            CallSite::Refine => "refine",
        }
    }
}

/// Why the generative capability stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxTokens,
    Error,
    ToolUseOnly,
}

/// A tool invocation requested by the generative capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// Request sent to the generative capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

/// Raw response from the generative capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    #[serde(default)]
    pub text: String,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl Generation {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: StopReason::Completed,
            tool_calls: Vec::new(),
        }
    }

    pub fn stopped(stop_reason: StopReason) -> Self {
        Self {
            text: String::new(),
            stop_reason,
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_use(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            stop_reason: StopReason::ToolUseOnly,
            tool_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_serializes_with_status_tag() {
        let ok = serde_json::to_value(ToolResult::ok(json!({"saved": true}))).expect("ok");
        assert_eq!(ok, json!({"status": "ok", "payload": {"saved": true}}));

        let err = serde_json::to_value(ToolResult::error("boom")).expect("err");
        assert_eq!(err, json!({"status": "error", "message": "boom"}));
    }

    #[test]
    fn subtask_output_joins_only_reasoning_text() {
        let mut subtask = Subtask::pending("t1", "research");
        subtask.observations.push(Observation::reasoning("first"));
        subtask
            .observations
            .push(Observation::tool("search", ToolResult::ok("ignored")));
        subtask.observations.push(Observation::reasoning("second"));
        assert_eq!(subtask.output(), "first\nsecond");
    }

    #[test]
    fn decision_uses_screaming_snake_case() {
        let value = serde_json::to_value(RevisionDecision::KeepPlan).expect("serialize");
        assert_eq!(value, json!("KEEP_PLAN"));
        assert_eq!(RevisionDecision::AbortTask.as_str(), "ABORT_TASK");
    }

    #[test]
    fn terminal_state_is_tagged() {
        let value = serde_json::to_value(TerminalState::Aborted {
            reason: "infeasible".to_string(),
        })
        .expect("serialize");
        assert_eq!(value, json!({"state": "aborted", "reason": "infeasible"}));
    }
}
