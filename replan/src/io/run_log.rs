//! Run artifacts under `<out>/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::types::TerminalState;
use crate::report::render_summary;
use crate::run::RunReport;

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta<'a> {
    pub run_id: &'a str,
    pub goal: &'a str,
    pub terminal_state: &'a TerminalState,
    pub started_at: &'a str,
    pub duration_ms: u64,
    pub original_subtasks: usize,
    pub final_subtasks: usize,
    pub completed_subtasks: usize,
    pub revisions: usize,
    pub reflection_cycles: usize,
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub original_plan_path: PathBuf,
    pub final_plan_path: PathBuf,
    pub revisions_path: PathBuf,
    pub reflections_path: PathBuf,
    pub synthesized_path: PathBuf,
    pub artifact_path: PathBuf,
    pub summary_path: PathBuf,
    pub events_path: PathBuf,
}

impl RunPaths {
    pub fn new(out_dir: &Path, run_id: &str) -> Self {
        let dir = out_dir.join(run_id);
        Self {
            meta_path: dir.join("meta.json"),
            original_plan_path: dir.join("plan.original.json"),
            final_plan_path: dir.join("plan.final.json"),
            revisions_path: dir.join("revisions.json"),
            reflections_path: dir.join("reflections.json"),
            synthesized_path: dir.join("artifact.synthesized.md"),
            artifact_path: dir.join("artifact.md"),
            summary_path: dir.join("summary.md"),
            events_path: dir.join("events.jsonl"),
            dir,
        }
    }
}

/// `run-<UTC timestamp>-<first 8 hex chars of sha256(goal)>`.
pub fn run_id(goal: &str, now: DateTime<Utc>) -> String {
    let digest = hex::encode(Sha256::digest(goal.trim().as_bytes()));
    format!("run-{}-{}", now.format("%Y%m%dT%H%M%SZ"), &digest[..8])
}

/// Create a fresh run directory, adding `-2`, `-3`, ... when the id is taken.
pub fn create_run_dir(out_dir: &Path, base_id: &str) -> Result<RunPaths> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("create output dir {}", out_dir.display()))?;
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base_id.to_string()
        } else {
            format!("{base_id}-{suffix}")
        };
        let paths = RunPaths::new(out_dir, &id);
        match fs::create_dir(&paths.dir) {
            Ok(()) => return Ok(paths),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", paths.dir.display()));
            }
        }
    }
    Err(anyhow!(
        "unable to create a unique run dir for '{base_id}' (too many existing runs)"
    ))
}

/// Write every artifact of `report` into `paths.dir` (which must exist).
pub fn write_run(paths: &RunPaths, report: &RunReport) -> Result<()> {
    let run_id = paths
        .dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let meta = RunMeta {
        run_id,
        goal: &report.goal,
        terminal_state: &report.terminal_state,
        started_at: &report.started_at,
        duration_ms: report.duration_ms,
        original_subtasks: report.original_plan.len(),
        final_subtasks: report.final_plan.len(),
        completed_subtasks: report.completed_subtasks(),
        revisions: report.revisions.len(),
        reflection_cycles: report.reflections.len(),
    };

    // Deterministic order keeps partial runs easy to read.
    write_json(&paths.meta_path, &meta)?;
    write_json(&paths.original_plan_path, &report.original_plan)?;
    write_json(&paths.final_plan_path, &report.final_plan)?;
    write_json(&paths.revisions_path, &report.revisions)?;
    write_json(&paths.reflections_path, &report.reflections)?;
    if let Some(synthesized) = &report.synthesized {
        write_text(&paths.synthesized_path, &with_newline(synthesized))?;
    }
    if let Some(artifact) = &report.artifact {
        write_text(&paths.artifact_path, &with_newline(artifact))?;
    }
    write_text(&paths.summary_path, &render_summary(report))?;
    Ok(())
}

fn with_newline(text: &str) -> String {
    let mut buf = text.trim_end().to_string();
    buf.push('\n');
    buf
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
