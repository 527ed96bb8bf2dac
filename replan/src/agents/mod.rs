//! Agents: one per generative call site, all routed through the budgeted call policy.

use crate::core::obstacle::ObstacleClassifier;
use crate::events::EventSink;
use crate::io::config::AgentConfig;
use crate::io::gateway::Gateway;
use crate::io::generator::Generator;
use crate::io::prompt::PromptEngine;

use self::policy::BudgetedCaller;

pub mod assessor;
pub mod executor;
pub mod planner;
pub mod policy;
pub mod reflector;
pub mod reviser;
pub mod synthesizer;

/// Collaborators shared by every agent during one run.
pub struct AgentContext<'a, G: Generator> {
    pub generator: &'a G,
    pub gateway: &'a Gateway,
    pub classifier: &'a dyn ObstacleClassifier,
    pub events: &'a dyn EventSink,
    pub prompts: &'a PromptEngine,
    pub config: &'a AgentConfig,
}

impl<'a, G: Generator> AgentContext<'a, G> {
    pub fn caller(&self) -> BudgetedCaller<'a, G> {
        BudgetedCaller::new(self.generator, self.config, self.events)
    }
}
