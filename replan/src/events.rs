//! Structured engine events and the sinks that receive them.
//!
//! The engine never touches the global subscriber directly for product events;
//! it emits [`AgentEvent`]s into an injected [`EventSink`]. `TracingSink` forwards
//! them to `tracing`, `JsonlSink` appends them to a file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::budget::{DegradationPolicy, ResponseCondition};
use crate::core::types::{CallSite, ObstacleKind, RevisionDecision, SubtaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted {
        goal: String,
    },
    PlanCompiled {
        subtasks: usize,
    },
    CallAttempt {
        site: CallSite,
        attempt: u32,
        token_budget: u32,
        condition: ResponseCondition,
    },
    CallDegraded {
        site: CallSite,
        policy: DegradationPolicy,
        attempts: u32,
    },
    SubtaskStarted {
        id: String,
        description: String,
    },
    ToolInvoked {
        subtask_id: String,
        tool: String,
        is_error: bool,
    },
    ObstacleDetected {
        subtask_id: String,
        kind: ObstacleKind,
        evidence: String,
    },
    AssessmentMade {
        subtask_id: String,
        decision: RevisionDecision,
    },
    PlanRevised {
        sequence_number: u32,
        removed: usize,
        added: usize,
    },
    SubtaskFinished {
        id: String,
        status: SubtaskStatus,
    },
    ReflectionCycle {
        iteration: u32,
        refined: bool,
        accepted: bool,
    },
    RunFinished {
        state: String,
    },
}

pub trait EventSink {
    fn emit(&self, event: &AgentEvent);
}

impl<S: EventSink + ?Sized> EventSink for std::rc::Rc<S> {
    fn emit(&self, event: &AgentEvent) {
        (**self).emit(event);
    }
}

/// Forwards events to the process-wide `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AgentEvent) {
        match event {
            AgentEvent::CallDegraded {
                site,
                policy,
                attempts,
            } => warn!(
                site = site.as_str(),
                policy = policy.as_str(),
                attempts,
                "generation degraded"
            ),
            AgentEvent::ObstacleDetected {
                subtask_id,
                kind,
                evidence,
            } => warn!(subtask = %subtask_id, kind = kind.as_str(), %evidence, "obstacle detected"),
            other => info!(event = ?other, "agent event"),
        }
    }
}

/// Appends one JSON object per line. Write failures are logged, not raised.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &AgentEvent) {
        let Ok(mut writer) = self.writer.lock() else {
            warn!("event log lock poisoned");
            return;
        };
        let written = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(err) = written {
            warn!(err = %err, "failed to append event");
        }
    }
}

/// Sends each event to every inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &AgentEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
