//! Engine configuration stored as TOML (default `replan.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::budget::DegradationPolicy;
use crate::core::cycle_guard::CycleGuardConfig;
use crate::core::obstacle::ObstacleKeywords;
use crate::core::types::CallSite;

pub const DEFAULT_CONFIG_FILE: &str = "replan.toml";

/// Engine configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Attempts per generative call before the degradation policy applies (1..=8).
    pub max_attempts: u32,

    /// Reasoning/tool steps allowed per subtask before `IterationLimitReached`.
    pub subtask_max_steps: u32,

    /// Critique/refine iterations over the synthesized artifact (1..=9).
    pub reflection_max_iterations: u32,

    /// Hard cap on applied revisions per run.
    pub max_revisions: u32,

    pub budgets: BudgetTable,
    pub degradation: DegradationTable,
    pub cycle_guard: CycleGuardConfig,
    pub obstacles: ObstacleKeywords,
    pub generator: GeneratorConfig,
    pub tools: ToolsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            subtask_max_steps: 10,
            reflection_max_iterations: 3,
            max_revisions: 8,
            budgets: BudgetTable::default(),
            degradation: DegradationTable::default(),
            cycle_guard: CycleGuardConfig::default(),
            obstacles: ObstacleKeywords::default(),
            generator: GeneratorConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Base token budget per call site. Attempt `i` uses `base * 2^i`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetTable {
    pub plan: u32,
    pub execute: u32,
    pub assess: u32,
    pub revise: u32,
    pub synthesize: u32,
    pub critique: u32,
    pub refine: u32,
}

impl Default for BudgetTable {
    fn default() -> Self {
        Self {
            plan: 2048,
            execute: 4096,
            assess: 4096,
            revise: 4096,
            synthesize: 8192,
            critique: 4096,
            refine: 8192,
        }
    }
}

impl BudgetTable {
    pub fn base(&self, site: CallSite) -> u32 {
        match site {
            CallSite::Plan => self.plan,
            CallSite::Execute => self.execute,
            CallSite::Assess => self.assess,
            CallSite::Revise => self.revise,
            CallSite::Synthesize => self.synthesize,
            CallSite::Critique => self.critique,
            CallSite::Refine => self.refine,
        }
    }
}

/// Call site → degradation policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DegradationTable {
    pub plan: DegradationPolicy,
    pub execute: DegradationPolicy,
    pub assess: DegradationPolicy,
    pub revise: DegradationPolicy,
    pub synthesize: DegradationPolicy,
    pub critique: DegradationPolicy,
    pub refine: DegradationPolicy,
}

impl Default for DegradationTable {
    fn default() -> Self {
        Self {
            plan: DegradationPolicy::Fatal,
            execute: DegradationPolicy::DefaultValue,
            assess: DegradationPolicy::DefaultValue,
            revise: DegradationPolicy::DefaultValue,
            synthesize: DegradationPolicy::Fatal,
            critique: DegradationPolicy::DefaultValue,
            refine: DegradationPolicy::KeepPrevious,
        }
    }
}

impl DegradationTable {
    pub fn policy(&self, site: CallSite) -> DegradationPolicy {
        match site {
            CallSite::Plan => self.plan,
            CallSite::Execute => self.execute,
            CallSite::Assess => self.assess,
            CallSite::Revise => self.revise,
            CallSite::Synthesize => self.synthesize,
            CallSite::Critique => self.critique,
            CallSite::Refine => self.refine,
        }
    }
}

/// External command bridging to the generative capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// argv of the generator command. Empty means "not configured".
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory `save_draft` writes into. Relative paths resolve against the run's cwd.
    pub output_dir: PathBuf,
    pub commands: Vec<CommandToolConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            commands: Vec::new(),
        }
    }
}

/// A tool backed by an external command (`[[tools.commands]]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Required input fields, validated by the gateway before the command runs.
    #[serde(default)]
    pub required: Vec<String>,
    pub command: Vec<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.max_attempts) {
            bail!("max_attempts must be within 1..=8");
        }
        if self.subtask_max_steps == 0 {
            bail!("subtask_max_steps must be > 0");
        }
        if !(1..=9).contains(&self.reflection_max_iterations) {
            bail!("reflection_max_iterations must be within 1..=9");
        }
        for site in CallSite::ALL {
            if self.budgets.base(site) == 0 {
                bail!("budgets.{} must be > 0", site.as_str());
            }
            let policy = self.degradation.policy(site);
            let allowed = match site {
                CallSite::Plan | CallSite::Synthesize => policy == DegradationPolicy::Fatal,
                CallSite::Refine => true,
                _ => policy != DegradationPolicy::KeepPrevious,
            };
            if !allowed {
                bail!(
                    "degradation.{} = {} has no meaningful fallback",
                    site.as_str(),
                    policy.as_str()
                );
            }
        }
        if self.cycle_guard.max_repeats < 2 {
            bail!("cycle_guard.max_repeats must be >= 2");
        }
        if self.cycle_guard.window < self.cycle_guard.max_repeats {
            bail!("cycle_guard.window must be >= cycle_guard.max_repeats");
        }
        if self.generator.timeout_secs == 0 {
            bail!("generator.timeout_secs must be > 0");
        }
        if self.generator.output_limit_bytes == 0 {
            bail!("generator.output_limit_bytes must be > 0");
        }
        if self
            .generator
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("generator.command must start with a program"));
        }
        let mut names = std::collections::HashSet::new();
        for tool in &self.tools.commands {
            if tool.name.trim().is_empty() {
                bail!("tools.commands entries need a name");
            }
            if !names.insert(tool.name.as_str()) {
                bail!("duplicate tool name '{}'", tool.name);
            }
            if tool.command.is_empty() || tool.command[0].trim().is_empty() {
                bail!("tools.commands '{}' needs a non-empty command", tool.name);
            }
            if tool.timeout_secs == 0 {
                bail!("tools.commands '{}' timeout_secs must be > 0", tool.name);
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
