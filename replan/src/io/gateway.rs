//! Capability gateway: a registry of named tools with uniform input validation.
//!
//! Every failure (unknown tool, malformed input, handler error) is returned as
//! [`ToolResult::Error`]; nothing here panics or propagates caller mistakes.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use jsonschema::{Validator, validator_for};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::types::ToolResult;

/// A required input field and what the tool expects in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredField {
    pub name: String,
    pub expectation: String,
}

impl RequiredField {
    pub fn new(name: impl Into<String>, expectation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expectation: expectation.into(),
        }
    }
}

/// Static description of a tool: name, prose, and input contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Checked in order before the schema runs.
    pub required: Vec<RequiredField>,
    /// JSON Schema for the whole input object.
    pub input_schema: Value,
}

/// A handler the gateway can dispatch to.
///
/// `call` only sees inputs that already passed the spec's checks. Errors are
/// converted into `ToolResult::Error` by the gateway.
pub trait Tool {
    fn spec(&self) -> &ToolSpec;
    fn call(&self, input: &Map<String, Value>) -> Result<Value>;
}

struct Registered {
    tool: Box<dyn Tool>,
    validator: Validator,
}

/// Tool name → {spec, compiled schema, handler}.
#[derive(Default)]
pub struct Gateway {
    tools: BTreeMap<String, Registered>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names must be unique and schemas must compile.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        let spec = tool.spec();
        if spec.name.trim().is_empty() {
            bail!("tool name must not be empty");
        }
        if self.tools.contains_key(&spec.name) {
            bail!("tool '{}' already registered", spec.name);
        }
        let validator = validator_for(&spec.input_schema)
            .map_err(|err| anyhow!("invalid input schema for tool '{}': {}", spec.name, err))?;
        let name = spec.name.clone();
        debug!(tool = %name, "registered tool");
        self.tools.insert(name, Registered { tool, validator });
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.tools.values().map(|entry| entry.tool.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `input` and dispatch to the named tool.
    #[instrument(skip_all, fields(tool = %name))]
    pub fn invoke(&self, name: &str, input: &Value) -> ToolResult {
        let Some(entry) = self.tools.get(name) else {
            let known = self.names();
            let known = if known.is_empty() {
                "(none)".to_string()
            } else {
                known.join(", ")
            };
            return ToolResult::error(format!("Unknown tool '{name}'. Available tools: {known}"));
        };
        let spec = entry.tool.spec();

        let Some(fields) = input.as_object() else {
            return ToolResult::error(format!(
                "Invalid input for tool '{name}': expected a JSON object"
            ));
        };

        if let Some(message) = check_required(&spec.required, fields) {
            debug!(%message, "rejected tool input");
            return ToolResult::error(message);
        }

        let violations: Vec<String> = entry
            .validator
            .iter_errors(input)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return ToolResult::error(format!(
                "Invalid input for tool '{name}': {}",
                violations.join("; ")
            ));
        }

        match entry.tool.call(fields) {
            Ok(payload) => ToolResult::ok(payload),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "tool failed");
                ToolResult::error(format!("Tool '{name}' failed: {err:#}"))
            }
        }
    }
}

fn check_required(required: &[RequiredField], fields: &Map<String, Value>) -> Option<String> {
    required.iter().find_map(|field| match fields.get(&field.name) {
        None => Some(format!(
            "Missing required parameter '{}': {}",
            field.name, field.expectation
        )),
        Some(value) if is_empty_value(value) => Some(format!(
            "Empty required parameter '{}': {}",
            field.name, field.expectation
        )),
        Some(_) => None,
    })
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
