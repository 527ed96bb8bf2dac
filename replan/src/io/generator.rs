//! Generative capability abstraction.
//!
//! The [`Generator`] trait decouples the engine from whatever produces text.
//! [`CommandGenerator`] bridges to an external command speaking a small JSON
//! protocol; tests use scripted generators that never spawn processes.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{Generation, GenerationRequest};
use crate::io::config::GeneratorConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Abstraction over generative backends.
pub trait Generator {
    /// Produce a response for `request`. `Err` means the transport failed.
    fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        (**self).generate(request)
    }
}

/// Generator that runs a command per request.
///
/// Protocol: the request is written to stdin as `{"prompt": ..., "max_tokens": ...}`;
/// stdout must hold `{"text": ..., "stop_reason": ..., "tool_calls": [...]}`.
/// `stop_reason` is one of `completed`, `max_tokens`, `error`, `tool_use_only`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
}

impl CommandGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(anyhow!(
                "generator.command is not configured (set it in the config file)"
            ));
        }
        Ok(Self {
            argv: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(max_tokens = request.max_tokens, program = self.argv.first().map_or("", String::as_str)))]
    fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let payload = serde_json::to_vec(&WireRequest {
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
        })
        .context("serialize generator request")?;

        let cmd = command_from_argv(&self.argv)?;
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run generator command")?;

        if !output.success() {
            let summary = output.failure_summary("generator", self.timeout);
            warn!(%summary, "generator command failed");
            return Err(anyhow!(summary));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "generator output exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let generation: Generation =
            serde_json::from_slice(&output.stdout).context("parse generator response json")?;
        debug!(
            stop_reason = ?generation.stop_reason,
            text_len = generation.text.len(),
            tool_calls = generation.tool_calls.len(),
            "generator responded"
        );
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StopReason;

    #[test]
    fn unconfigured_command_is_an_error() {
        let err = CommandGenerator::from_config(&GeneratorConfig::default()).expect_err("error");
        assert!(err.to_string().contains("generator.command"));
    }

    #[cfg(unix)]
    fn generator(script: &str) -> CommandGenerator {
        CommandGenerator::from_config(&GeneratorConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        })
        .expect("generator")
    }

    #[cfg(unix)]
    #[test]
    fn parses_json_response() {
        let generator = generator(
            r#"cat >/dev/null; printf '{"text":"1. Research","stop_reason":"completed"}'"#,
        );
        let generation = generator
            .generate(&GenerationRequest {
                prompt: "plan".to_string(),
                max_tokens: 2048,
            })
            .expect("generate");
        assert_eq!(generation.text, "1. Research");
        assert_eq!(generation.stop_reason, StopReason::Completed);
        assert!(generation.tool_calls.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn request_reaches_command_stdin() {
        let generator = generator(
            r#"input=$(cat); case "$input" in *'"max_tokens":4096'*) printf '{"text":"ok","stop_reason":"completed"}';; *) exit 9;; esac"#,
        );
        let generation = generator
            .generate(&GenerationRequest {
                prompt: "x".to_string(),
                max_tokens: 4096,
            })
            .expect("generate");
        assert_eq!(generation.text, "ok");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_error() {
        let generator = generator("cat >/dev/null; echo quota exceeded >&2; exit 2");
        let err = generator
            .generate(&GenerationRequest {
                prompt: "x".to_string(),
                max_tokens: 1,
            })
            .expect_err("error");
        assert!(err.to_string().contains("quota exceeded"));
    }
}
