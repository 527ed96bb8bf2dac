//! Parsers for the structural markers in generative output.
//!
//! Every parser is pure and returns `anyhow` errors for malformed text; the call
//! policy treats those as retryable.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

use crate::core::types::RevisionDecision;

static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:subtask|step)\s+)?(\d+)\s*[.:)]\s*(.+)$").expect("numbered line regex")
});

static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\**\s*(ASSESSMENT|REASONING|REVISED_PLAN|REVISION_NOTES)\s*\**\s*:\s*\**\s*(.*)$")
        .expect("section header regex")
});

/// Line that tells the reviser no further work is needed.
pub const PLAN_COMPLETE_MARKER: &str = "PLAN COMPLETE";

/// Parse numbered list lines (`SUBTASK 1: ...`, `1. ...`, `Step 2: ...`) in source order.
///
/// Other lines are ignored. Surrounding markdown emphasis is stripped from each
/// description.
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['#', '-', '*']).trim();
            let captures = NUMBERED_LINE.captures(line)?;
            let description = captures
                .get(2)?
                .as_str()
                .trim()
                .trim_matches('*')
                .trim();
            (!description.is_empty()).then(|| description.to_string())
        })
        .collect()
}

/// Parse the plan compiler's output. An empty list is malformed.
pub fn parse_plan(text: &str) -> Result<Vec<String>> {
    let subtasks = parse_numbered_list(text);
    if subtasks.is_empty() {
        bail!("no numbered subtasks in plan output");
    }
    Ok(subtasks)
}

/// Parse the reviser's output: either `PLAN COMPLETE` (empty list) or a numbered list.
pub fn parse_revised_remaining(text: &str) -> Result<Vec<String>> {
    let subtasks = parse_numbered_list(text);
    if !subtasks.is_empty() {
        return Ok(subtasks);
    }
    if text
        .lines()
        .any(|line| line.trim().eq_ignore_ascii_case(PLAN_COMPLETE_MARKER))
    {
        return Ok(Vec::new());
    }
    bail!("revision output has neither numbered subtasks nor {PLAN_COMPLETE_MARKER}");
}

/// Structured assessor output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub decision: RevisionDecision,
    pub reasoning: String,
    pub notes: String,
    /// Replacement remaining subtasks proposed alongside a `REVISE_PLAN` decision.
    pub proposed_remaining: Vec<String>,
}

impl Assessment {
    /// Safe default used when the assessor cannot produce a usable decision.
    pub fn keep_plan(reasoning: impl Into<String>) -> Self {
        Self {
            decision: RevisionDecision::KeepPlan,
            reasoning: reasoning.into(),
            notes: String::new(),
            proposed_remaining: Vec::new(),
        }
    }
}

/// Parse `ASSESSMENT:` / `REASONING:` / `REVISED_PLAN:` / `REVISION_NOTES:` sections.
///
/// The `ASSESSMENT:` line is required and must name one of the three decisions.
pub fn parse_assessment(text: &str) -> Result<Assessment> {
    let mut decision = None;
    let mut reasoning = Vec::new();
    let mut plan = Vec::new();
    let mut notes = Vec::new();
    let mut current = Section::Preamble;

    for line in text.lines() {
        let trimmed = line.trim();
        let (section, content) = match SECTION_HEADER.captures(trimmed) {
            Some(captures) => {
                let rest = captures.get(2).map_or("", |m| m.as_str()).trim();
                current = match captures.get(1).map(|m| m.as_str().to_ascii_uppercase()) {
                    Some(header) if header == "ASSESSMENT" => {
                        if decision.is_none() {
                            decision = parse_decision(rest);
                        }
                        Section::Preamble
                    }
                    Some(header) if header == "REASONING" => Section::Reasoning,
                    Some(header) if header == "REVISED_PLAN" => Section::Plan,
                    _ => Section::Notes,
                };
                if rest.is_empty() {
                    continue;
                }
                (current, rest)
            }
            None => (current, line),
        };
        match section {
            Section::Preamble => {}
            Section::Reasoning => reasoning.push(content.to_string()),
            Section::Plan => plan.push(content.to_string()),
            Section::Notes => notes.push(content.to_string()),
        }
    }

    let Some(decision) = decision else {
        bail!("assessment output has no ASSESSMENT decision");
    };
    Ok(Assessment {
        decision,
        reasoning: reasoning.join("\n").trim().to_string(),
        notes: notes.join("\n").trim().to_string(),
        proposed_remaining: parse_numbered_list(&plan.join("\n")),
    })
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Reasoning,
    Plan,
    Notes,
}

fn parse_decision(value: &str) -> Option<RevisionDecision> {
    let normalized = value
        .trim()
        .trim_matches(['*', '`', '"'])
        .to_ascii_uppercase()
        .replace([' ', '-'], "_");
    if normalized.starts_with("REVISE_PLAN") {
        Some(RevisionDecision::RevisePlan)
    } else if normalized.starts_with("ABORT_TASK") {
        Some(RevisionDecision::AbortTask)
    } else if normalized.starts_with("KEEP_PLAN") {
        Some(RevisionDecision::KeepPlan)
    } else {
        None
    }
}

/// Critic verdict on the current artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Satisfactory,
    NeedsImprovement,
}

/// Parse a critique: a `VERDICT:` line wins, otherwise the first keyword found.
pub fn parse_verdict(text: &str) -> Result<Verdict> {
    for line in text.lines() {
        let upper = line.trim().trim_matches('*').to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("VERDICT:")
            && let Some(verdict) = keyword_verdict(rest)
        {
            return Ok(verdict);
        }
    }
    match keyword_verdict(&text.to_ascii_uppercase()) {
        Some(verdict) => Ok(verdict),
        None => bail!("critique has no verdict"),
    }
}

fn keyword_verdict(upper: &str) -> Option<Verdict> {
    let upper = upper.replace('_', " ");
    if upper.contains("UNSATISFACTORY") || upper.contains("NOT SATISFACTORY") {
        return Some(Verdict::NeedsImprovement);
    }
    let improve = upper.find("NEEDS IMPROVEMENT");
    let satisfied = upper.find("SATISFACTORY");
    match (improve, satisfied) {
        (Some(i), Some(s)) if s < i => Some(Verdict::Satisfactory),
        (Some(_), _) => Some(Verdict::NeedsImprovement),
        (None, Some(_)) => Some(Verdict::Satisfactory),
        (None, None) => None,
    }
}
