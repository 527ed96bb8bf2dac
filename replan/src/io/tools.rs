//! Built-in tools and the gateway assembled from configuration.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use crate::io::config::{CommandToolConfig, ToolsConfig};
use crate::io::gateway::{Gateway, RequiredField, Tool, ToolSpec};
use crate::io::process::{command_from_argv, run_command_with_timeout};

const DEFAULT_DRAFT_FILENAME: &str = "draft.md";
const TOOL_OUTPUT_LIMIT_BYTES: usize = 200_000;

/// Register `save_draft` plus every `[[tools.commands]]` entry.
pub fn build_gateway(config: &ToolsConfig) -> Result<Gateway> {
    let mut gateway = Gateway::new();
    gateway.register(Box::new(SaveDraftTool::new(config.output_dir.clone())))?;
    for tool in &config.commands {
        gateway
            .register(Box::new(CommandTool::new(tool)))
            .with_context(|| format!("register tool '{}'", tool.name))?;
    }
    Ok(gateway)
}

/// Writes content to a file under a fixed output directory.
pub struct SaveDraftTool {
    output_dir: PathBuf,
    spec: ToolSpec,
}

impl SaveDraftTool {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            spec: ToolSpec {
                name: "save_draft".to_string(),
                description: "Save draft content to a file in the output directory.".to_string(),
                required: vec![RequiredField::new(
                    "content",
                    "the text to save must be provided",
                )],
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "filename": {"type": "string", "minLength": 1}
                    }
                }),
            },
        }
    }
}

impl Tool for SaveDraftTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    #[instrument(skip_all)]
    fn call(&self, input: &Map<String, Value>) -> Result<Value> {
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("content must be a string"))?;
        let filename = input
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DRAFT_FILENAME);
        let relative = safe_relative_path(filename)?;
        let path = self.output_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), bytes = content.len(), "saved draft");
        Ok(json!({
            "path": path.display().to_string(),
            "bytes": content.len(),
        }))
    }
}

/// Only plain relative components; no `..`, roots, or prefixes.
fn safe_relative_path(filename: &str) -> Result<&Path> {
    let path = Path::new(filename);
    if filename.trim().is_empty()
        || !path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        bail!("filename '{filename}' must be a relative path inside the output directory");
    }
    Ok(path)
}

/// Tool backed by an external command.
///
/// The validated input object is written to stdin as JSON. Stdout becomes the
/// payload (parsed as JSON when it is JSON, otherwise kept as text).
pub struct CommandTool {
    argv: Vec<String>,
    timeout: Duration,
    spec: ToolSpec,
}

impl CommandTool {
    pub fn new(config: &CommandToolConfig) -> Self {
        let properties: Map<String, Value> = config
            .required
            .iter()
            .map(|field| (field.clone(), json!({})))
            .collect();
        Self {
            argv: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            spec: ToolSpec {
                name: config.name.clone(),
                description: config.description.clone(),
                required: config
                    .required
                    .iter()
                    .map(|field| RequiredField::new(field, "a non-empty value is required"))
                    .collect(),
                input_schema: json!({"type": "object", "properties": properties}),
            },
        }
    }
}

impl Tool for CommandTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(tool = %self.spec.name))]
    fn call(&self, input: &Map<String, Value>) -> Result<Value> {
        let stdin = serde_json::to_vec(input).context("serialize tool input")?;
        let cmd = command_from_argv(&self.argv)?;
        let output = run_command_with_timeout(cmd, Some(&stdin), self.timeout, TOOL_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run tool '{}'", self.spec.name))?;
        if !output.success() {
            bail!(output.failure_summary(&self.spec.name, self.timeout));
        }
        let text = output.stdout_text();
        let trimmed = text.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}
