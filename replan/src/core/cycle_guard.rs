//! Oscillation guard for plan revisions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::types::ObstacleKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CycleGuardConfig {
    /// Number of most recent revisions considered.
    pub window: usize,
    /// Occurrences of one signature inside the window that trip the guard.
    pub max_repeats: usize,
}

impl Default for CycleGuardConfig {
    fn default() -> Self {
        Self {
            window: 4,
            max_repeats: 2,
        }
    }
}

/// Stable hex signature of one revision: obstacle kind plus the new remaining descriptions.
pub fn revision_signature(kind: ObstacleKind, new_remaining: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for description in new_remaining {
        hasher.update([0u8]);
        hasher.update(description.trim().to_lowercase().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Tracks revision signatures for one run.
#[derive(Debug, Clone)]
pub struct CycleGuard {
    config: CycleGuardConfig,
    history: Vec<String>,
}

impl CycleGuard {
    pub fn new(config: CycleGuardConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    /// Record a signature. Returns an abort reason when it repeats too often.
    pub fn record(&mut self, signature: String) -> Option<String> {
        self.history.push(signature);
        let start = self.history.len().saturating_sub(self.config.window);
        let recent = &self.history[start..];
        let latest = recent.last()?;
        let repeats = recent.iter().filter(|sig| *sig == latest).count();
        (repeats >= self.config.max_repeats).then(|| {
            format!(
                "revision cycle detected: the same revision repeated {repeats} times within the last {} revisions",
                recent.len()
            )
        })
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
