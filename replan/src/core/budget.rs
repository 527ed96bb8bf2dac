//! Token budget escalation and response classification for generative calls.

use serde::{Deserialize, Serialize};

use crate::core::types::{Generation, StopReason};

/// Token budget for attempt `attempt` (0-indexed): `base * 2^attempt`, saturating.
pub fn attempt_budget(base: u32, attempt: u32) -> u32 {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// What to do once every attempt at a call site has been used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationPolicy {
    /// Surface `GenerationExhausted` to the run's caller.
    Fatal,
    /// Return the call site's predetermined safe default.
    DefaultValue,
    /// Return the caller's prior content unchanged.
    KeepPrevious,
}

impl DegradationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DegradationPolicy::Fatal => "fatal",
            DegradationPolicy::DefaultValue => "default_value",
            DegradationPolicy::KeepPrevious => "keep_previous",
        }
    }
}

/// Outcome of a single attempt, as recorded for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCondition {
    Usable,
    /// Stopped on the token budget.
    Truncated,
    /// The capability reported an error stop.
    Errored,
    /// Completed with no text.
    Blank,
    /// Only tool calls, no text. Not retried.
    ToolUseOnly,
    /// Text that the call site could not parse.
    Malformed,
    /// The generator itself returned an error (transport, timeout).
    Unavailable,
}

impl ResponseCondition {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ResponseCondition::Truncated
                | ResponseCondition::Errored
                | ResponseCondition::Blank
                | ResponseCondition::Malformed
                | ResponseCondition::Unavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseCondition::Usable => "usable",
            ResponseCondition::Truncated => "truncated",
            ResponseCondition::Errored => "errored",
            ResponseCondition::Blank => "blank",
            ResponseCondition::ToolUseOnly => "tool_use_only",
            ResponseCondition::Malformed => "malformed",
            ResponseCondition::Unavailable => "unavailable",
        }
    }
}

/// Classify a raw response before the call site parses it.
///
/// `max_tokens` and `error` stops are retryable even when some text came back,
/// since the text is partial.
pub fn classify_response(generation: &Generation) -> ResponseCondition {
    match generation.stop_reason {
        StopReason::MaxTokens => ResponseCondition::Truncated,
        StopReason::Error => ResponseCondition::Errored,
        _ if !generation.text.trim().is_empty() => ResponseCondition::Usable,
        StopReason::ToolUseOnly => ResponseCondition::ToolUseOnly,
        StopReason::Completed if !generation.tool_calls.is_empty() => {
            ResponseCondition::ToolUseOnly
        }
        StopReason::Completed => ResponseCondition::Blank,
    }
}
