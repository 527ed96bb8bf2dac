//! Obstacle detection over a subtask's execution trace.
//!
//! The execution loop depends only on [`ObstacleClassifier`]; the keyword
//! classifier below is the default strategy.

use serde::{Deserialize, Serialize};

use crate::core::types::{Observation, Obstacle, ObstacleKind, ToolResult};

/// Line prefix a reasoning step uses to declare a missing prerequisite.
pub const BLOCKED_MARKER: &str = "BLOCKED:";
/// Line prefix a reasoning step uses to declare conflicting observations.
pub const CONFLICT_MARKER: &str = "CONFLICT:";

const EVIDENCE_LIMIT_CHARS: usize = 240;

/// Everything the detector may look at for one executed subtask.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTrace<'a> {
    pub observations: &'a [Observation],
    /// True when the executor hit its step cap without a completion signal.
    pub step_limit_reached: bool,
}

/// Maps an execution trace to an obstacle (or [`ObstacleKind::None`]).
pub trait ObstacleClassifier {
    fn classify(&self, trace: &ExecutionTrace<'_>) -> Obstacle;
}

/// Phrase tables for the keyword classifier. Matching is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObstacleKeywords {
    pub insufficient_information: Vec<String>,
    pub contradiction: Vec<String>,
}

impl Default for ObstacleKeywords {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            insufficient_information: owned(&[
                "not enough information",
                "insufficient data",
                "cannot find",
                "no results",
                "unable to locate",
            ]),
            contradiction: owned(&["contradicts", "conflicts with", "inconsistent"]),
        }
    }
}

/// First-match-wins rules:
/// 1. any error observation → `ToolFailure`
/// 2. step cap reached → `IterationLimitReached`
/// 3. `BLOCKED:` marker or insufficient-information phrase → `InsufficientInformation`
/// 4. `CONFLICT:` marker or contradiction phrase → `Contradiction`
///
/// Rules 3 and 4 scan reasoning text only, after quoted material is removed.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    keywords: ObstacleKeywords,
}

impl KeywordClassifier {
    pub fn new(keywords: ObstacleKeywords) -> Self {
        Self { keywords }
    }
}

impl ObstacleClassifier for KeywordClassifier {
    fn classify(&self, trace: &ExecutionTrace<'_>) -> Obstacle {
        if let Some((label, message)) = trace.observations.iter().find_map(|obs| match &obs.result {
            ToolResult::Error { message } => Some((obs.label(), message)),
            ToolResult::Ok { .. } => None,
        }) {
            return Obstacle::new(ObstacleKind::ToolFailure, format!("{label}: {message}"));
        }

        if trace.step_limit_reached {
            return Obstacle::new(
                ObstacleKind::IterationLimitReached,
                format!(
                    "step cap reached after {} observations without completion",
                    trace.observations.len()
                ),
            );
        }

        let reasoning: Vec<String> = trace
            .observations
            .iter()
            .filter_map(Observation::reasoning_text)
            .map(strip_quoted)
            .collect();

        let rules = [
            (
                ObstacleKind::InsufficientInformation,
                BLOCKED_MARKER,
                &self.keywords.insufficient_information,
            ),
            (
                ObstacleKind::Contradiction,
                CONFLICT_MARKER,
                &self.keywords.contradiction,
            ),
        ];
        for (kind, marker, phrases) in rules {
            if let Some(line) = reasoning
                .iter()
                .find_map(|text| find_signal(text, marker, phrases))
            {
                return Obstacle::new(kind, truncate_evidence(line));
            }
        }

        Obstacle::none()
    }
}

/// Line carrying the marker, or else the first line containing any phrase.
fn find_signal<'t>(text: &'t str, marker: &str, phrases: &[String]) -> Option<&'t str> {
    if let Some(line) = text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(marker))
    {
        return Some(line);
    }
    text.lines().map(str::trim).find(|line| {
        let lower = line.to_lowercase();
        phrases
            .iter()
            .any(|phrase| !phrase.is_empty() && lower.contains(&phrase.to_lowercase()))
    })
}

/// Drop `>` block-quote lines and double-quoted spans.
pub fn strip_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with('>') {
            continue;
        }
        let mut quoted = false;
        for ch in line.chars() {
            match ch {
                '"' | '\u{201c}' | '\u{201d}' => quoted = !quoted,
                _ if !quoted => out.push(ch),
                _ => {}
            }
        }
        out.push('\n');
    }
    out
}

fn truncate_evidence(line: &str) -> String {
    if line.chars().count() <= EVIDENCE_LIMIT_CHARS {
        return line.to_string();
    }
    let mut clipped: String = line.chars().take(EVIDENCE_LIMIT_CHARS).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(observations: &[Observation], step_limit_reached: bool) -> Obstacle {
        KeywordClassifier::default().classify(&ExecutionTrace {
            observations,
            step_limit_reached,
        })
    }

    #[test]
    fn gateway_error_is_tool_failure() {
        let observations = vec![Observation::tool(
            "save_draft",
            ToolResult::error("Missing required parameter 'content'"),
        )];
        let obstacle = classify(&observations, false);
        assert_eq!(obstacle.kind, ObstacleKind::ToolFailure);
        assert!(obstacle.evidence.contains("Missing required parameter 'content'"));
    }

    #[test]
    fn tool_failure_wins_over_step_limit_and_phrases() {
        let observations = vec![
            Observation::reasoning("I cannot find the file"),
            Observation::reasoning_error("execute generation exhausted"),
        ];
        let obstacle = classify(&observations, true);
        assert_eq!(obstacle.kind, ObstacleKind::ToolFailure);
    }

    #[test]
    fn step_limit_without_errors() {
        let observations = vec![Observation::reasoning("still working")];
        let obstacle = classify(&observations, true);
        assert_eq!(obstacle.kind, ObstacleKind::IterationLimitReached);
    }

    #[test]
    fn blocked_marker_and_phrases_signal_missing_information() {
        let marked = vec![Observation::reasoning(
            "Looked around.\nBLOCKED: the dataset is not published",
        )];
        let obstacle = classify(&marked, false);
        assert_eq!(obstacle.kind, ObstacleKind::InsufficientInformation);
        assert_eq!(obstacle.evidence, "BLOCKED: the dataset is not published");

        let phrased = vec![Observation::reasoning("The search returned No Results.")];
        assert_eq!(
            classify(&phrased, false).kind,
            ObstacleKind::InsufficientInformation
        );
    }

    #[test]
    fn contradiction_phrase_detected() {
        let observations = vec![Observation::reasoning(
            "Source A contradicts source B on the release year.",
        )];
        assert_eq!(classify(&observations, false).kind, ObstacleKind::Contradiction);
    }

    #[test]
    fn quoted_material_is_ignored() {
        let observations = vec![Observation::reasoning(
            "> the report says it cannot find the archive\nThe user wrote \"this contradicts the brief\" but the work is done.",
        )];
        assert!(classify(&observations, false).is_none());
    }

    #[test]
    fn tool_payload_text_is_not_scanned() {
        let observations = vec![Observation::tool(
            "web_search",
            ToolResult::ok("no results for that query"),
        )];
        assert!(classify(&observations, false).is_none());
    }

    #[test]
    fn custom_tables_replace_defaults() {
        let classifier = KeywordClassifier::new(ObstacleKeywords {
            insufficient_information: vec!["missing input".to_string()],
            contradiction: Vec::new(),
        });
        let observations = vec![Observation::reasoning("no results, but that is fine")];
        let obstacle = classifier.classify(&ExecutionTrace {
            observations: &observations,
            step_limit_reached: false,
        });
        assert!(obstacle.is_none());
    }
}
