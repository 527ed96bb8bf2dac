//! Budgeted call policy: escalating token budgets with per-site degradation.

use std::fmt;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::budget::{DegradationPolicy, ResponseCondition, attempt_budget, classify_response};
use crate::core::types::{CallSite, Generation, GenerationRequest};
use crate::events::{AgentEvent, EventSink};
use crate::io::config::AgentConfig;
use crate::io::generator::Generator;

/// Retries at a Fatal call site ran out without usable text.
///
/// Carried inside `anyhow::Error`; callers distinguish it with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationExhausted {
    pub site: CallSite,
    pub attempts: u32,
    pub last_budget: u32,
    pub last_condition: ResponseCondition,
}

impl fmt::Display for GenerationExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} generation exhausted after {} attempts (last budget {}, last condition {})",
            self.site.as_str(),
            self.attempts,
            self.last_budget,
            self.last_condition.as_str()
        )
    }
}

impl std::error::Error for GenerationExhausted {}

/// Result of a policy-wrapped call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    /// Parsed from a usable response.
    Usable(T),
    /// The capability answered with tool calls only. Not retried, not degraded.
    Empty(Generation),
    /// Retries ran out; this is the site's fallback.
    Degraded(T),
}

/// Fallback values a call site can offer. The configured policy picks one.
#[derive(Debug, Clone)]
pub struct Fallbacks<T> {
    pub default_value: Option<T>,
    pub previous: Option<T>,
}

impl<T> Fallbacks<T> {
    /// No fallback: exhaustion is always fatal.
    pub fn none() -> Self {
        Self {
            default_value: None,
            previous: None,
        }
    }

    pub fn default_value(value: T) -> Self {
        Self {
            default_value: Some(value),
            previous: None,
        }
    }

    fn resolve(self, policy: DegradationPolicy) -> Option<T> {
        match policy {
            DegradationPolicy::Fatal => None,
            DegradationPolicy::DefaultValue => self.default_value,
            DegradationPolicy::KeepPrevious => self.previous,
        }
    }
}

impl<T: Clone> Fallbacks<T> {
    /// Prior content serves as both the default and the kept value.
    pub fn previous(value: T) -> Self {
        Self {
            default_value: Some(value.clone()),
            previous: Some(value),
        }
    }
}

/// Wraps every generative call made by the engine.
///
/// Never touches plan or subtask state; it only talks to the generator and the
/// event sink.
pub struct BudgetedCaller<'a, G: Generator> {
    generator: &'a G,
    config: &'a AgentConfig,
    events: &'a dyn EventSink,
}

impl<'a, G: Generator> BudgetedCaller<'a, G> {
    pub fn new(generator: &'a G, config: &'a AgentConfig, events: &'a dyn EventSink) -> Self {
        Self {
            generator,
            config,
            events,
        }
    }

    /// Call the generator for `site`, retrying with `base * 2^i` tokens.
    ///
    /// `parse` sees only responses with usable text; an `Err` from it counts as a
    /// malformed (retryable) response.
    #[instrument(skip_all, fields(site = site.as_str()))]
    pub fn call<T, P>(
        &self,
        site: CallSite,
        prompt: &str,
        parse: P,
        fallbacks: Fallbacks<T>,
    ) -> Result<CallOutcome<T>>
    where
        P: Fn(&Generation) -> Result<T>,
    {
        let base = self.config.budgets.base(site);
        let max_attempts = self.config.max_attempts;
        let mut last = (base, ResponseCondition::Unavailable);

        for attempt in 0..max_attempts {
            let token_budget = attempt_budget(base, attempt);
            let request = GenerationRequest {
                prompt: prompt.to_string(),
                max_tokens: token_budget,
            };
            let (condition, outcome) = match self.generator.generate(&request) {
                Err(err) => {
                    warn!(attempt, token_budget, err = %format!("{err:#}"), "generator call failed");
                    (ResponseCondition::Unavailable, None)
                }
                Ok(generation) => match classify_response(&generation) {
                    ResponseCondition::Usable => match parse(&generation) {
                        Ok(value) => (ResponseCondition::Usable, Some(CallOutcome::Usable(value))),
                        Err(err) => {
                            debug!(attempt, err = %err, "malformed response");
                            (ResponseCondition::Malformed, None)
                        }
                    },
                    ResponseCondition::ToolUseOnly => (
                        ResponseCondition::ToolUseOnly,
                        Some(CallOutcome::Empty(generation)),
                    ),
                    other => (other, None),
                },
            };
            self.record(site, attempt, token_budget, condition);
            match outcome {
                Some(outcome) if !condition.is_retryable() => return Ok(outcome),
                _ => last = (token_budget, condition),
            }
        }

        let policy = self.config.degradation.policy(site);
        match fallbacks.resolve(policy) {
            Some(value) => {
                self.events.emit(&AgentEvent::CallDegraded {
                    site,
                    policy,
                    attempts: max_attempts,
                });
                Ok(CallOutcome::Degraded(value))
            }
            None => Err(GenerationExhausted {
                site,
                attempts: max_attempts,
                last_budget: last.0,
                last_condition: last.1,
            }
            .into()),
        }
    }

    fn record(&self, site: CallSite, attempt: u32, token_budget: u32, condition: ResponseCondition) {
        debug!(attempt, token_budget, condition = condition.as_str(), "call attempt");
        self.events.emit(&AgentEvent::CallAttempt {
            site,
            attempt: attempt + 1,
            token_budget,
            condition,
        });
    }
}

/// Parse helper for sites that only need the trimmed text.
pub fn text_of(generation: &Generation) -> Result<String> {
    Ok(generation.text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StopReason;
    use crate::test_support::{RecordingSink, ScriptedGenerator, fail, text, tool_use, truncated};
    use anyhow::bail;
    use serde_json::json;

    fn caller_parts() -> (AgentConfig, RecordingSink) {
        (AgentConfig::default(), RecordingSink::default())
    }

    #[test]
    fn usable_first_attempt_uses_base_budget() {
        let (config, sink) = caller_parts();
        let generator = ScriptedGenerator::new([text("hello")]);
        let caller = BudgetedCaller::new(&generator, &config, &sink);
        let outcome = caller
            .call(CallSite::Plan, "p", text_of, Fallbacks::none())
            .expect("call");
        assert_eq!(outcome, CallOutcome::Usable("hello".to_string()));
        assert_eq!(generator.budgets(), vec![2048]);
    }

    #[test]
    fn budgets_double_across_retries() {
        let (config, sink) = caller_parts();
        let generator = ScriptedGenerator::new([truncated(), fail("connection reset"), text("ok")]);
        let caller = BudgetedCaller::new(&generator, &config, &sink);
        let outcome = caller
            .call(CallSite::Synthesize, "p", text_of, Fallbacks::none())
            .expect("call");
        assert_eq!(outcome, CallOutcome::Usable("ok".to_string()));
        assert_eq!(generator.budgets(), vec![8192, 16384, 32768]);
    }

    #[test]
    fn exhausted_fatal_site_returns_typed_error() {
        let (config, sink) = caller_parts();
        let generator = ScriptedGenerator::new([truncated(), truncated(), truncated()]);
        let caller = BudgetedCaller::new(&generator, &config, &sink);
        let err = caller
            .call(CallSite::Plan, "p", text_of, Fallbacks::none())
            .expect_err("fatal");
        let exhausted = err.downcast_ref::<GenerationExhausted>().expect("typed");
        assert_eq!(exhausted.site, CallSite::Plan);
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_budget, 8192);
        assert_eq!(exhausted.last_condition, ResponseCondition::Truncated);
    }

    #[test]
    fn default_value_is_returned_regardless_of_failure_shape() {
        let (config, sink) = caller_parts();
        let scripts = [
            vec![truncated(), truncated(), truncated()],
            vec![fail("x"), text("  "), truncated()],
            vec![text("garbage"), fail("y"), fail("z")],
        ];
        for script in scripts {
            let generator = ScriptedGenerator::new(script);
            let caller = BudgetedCaller::new(&generator, &config, &sink);
            let outcome = caller
                .call(
                    CallSite::Assess,
                    "p",
                    |g: &Generation| -> Result<String> {
                        if g.text.contains("ASSESSMENT") {
                            Ok(g.text.clone())
                        } else {
                            bail!("no decision")
                        }
                    },
                    Fallbacks::default_value("KEEP_PLAN".to_string()),
                )
                .expect("call");
            assert_eq!(outcome, CallOutcome::Degraded("KEEP_PLAN".to_string()));
        }
        let degraded = sink
            .events()
            .into_iter()
            .filter(|event| matches!(event, AgentEvent::CallDegraded { .. }))
            .count();
        assert_eq!(degraded, 3);
    }

    #[test]
    fn keep_previous_policy_returns_prior_content() {
        let (config, sink) = caller_parts();
        let generator = ScriptedGenerator::new([truncated(), truncated(), truncated()]);
        let caller = BudgetedCaller::new(&generator, &config, &sink);
        let outcome = caller
            .call(
                CallSite::Refine,
                "p",
                text_of,
                Fallbacks::previous("draft v1".to_string()),
            )
            .expect("call");
        assert_eq!(outcome, CallOutcome::Degraded("draft v1".to_string()));
    }

    #[test]
    fn tool_only_response_stops_without_retry() {
        let (config, sink) = caller_parts();
        let generator = ScriptedGenerator::new([tool_use("save_draft", json!({"content": "x"}))]);
        let caller = BudgetedCaller::new(&generator, &config, &sink);
        let outcome = caller
            .call(CallSite::Execute, "p", text_of, Fallbacks::none())
            .expect("call");
        match outcome {
            CallOutcome::Empty(generation) => {
                assert_eq!(generation.stop_reason, StopReason::ToolUseOnly);
                assert_eq!(generation.tool_calls.len(), 1);
            }
            other => panic!("expected empty outcome, got {other:?}"),
        }
        assert_eq!(generator.requests().len(), 1);
    }

    #[test]
    fn every_attempt_is_emitted() {
        let (config, sink) = caller_parts();
        let generator = ScriptedGenerator::new([truncated(), text("ok")]);
        let caller = BudgetedCaller::new(&generator, &config, &sink);
        caller
            .call(CallSite::Critique, "p", text_of, Fallbacks::none())
            .expect("call");
        let attempts: Vec<(u32, u32, ResponseCondition)> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                AgentEvent::CallAttempt {
                    attempt,
                    token_budget,
                    condition,
                    ..
                } => Some((attempt, token_budget, condition)),
                _ => None,
            })
            .collect();
        assert_eq!(
            attempts,
            vec![
                (1, 4096, ResponseCondition::Truncated),
                (2, 8192, ResponseCondition::Usable)
            ]
        );
    }
}
