//! Pipeline identity recorded with each run.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::stage::StepConfig;

/// What a run was validated with: the repository and the exact step list.
///
/// Two runs with the same `steps_digest` ran the same commands in the same
/// order, so their results are comparable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineSpec {
    /// Repository root path.
    pub repo_dir: PathBuf,

    /// SHA-256 digest of ordered enabled steps and their commands.
    pub steps_digest: String,

    /// Names of the enabled steps, in order.
    pub steps: Vec<String>,
}

impl PipelineSpec {
    pub fn new(repo_dir: PathBuf, steps: &[StepConfig]) -> Self {
        let enabled: Vec<&StepConfig> = steps.iter().filter(|s| s.enabled).collect();
        Self {
            repo_dir,
            steps_digest: compute_steps_digest(&enabled),
            steps: enabled.iter().map(|s| s.name.clone()).collect(),
        }
    }

    /// Tags stored on the ledger record of every run.
    pub fn tags(&self) -> serde_json::Value {
        serde_json::json!({
            "repo_dir": self.repo_dir.to_string_lossy(),
            "steps": self.steps,
            "steps_digest": self.steps_digest,
        })
    }
}

/// Compute deterministic digest of ordered steps.
fn compute_steps_digest(steps: &[&StepConfig]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.name.as_bytes());
        hasher.update(b"\0");
        for arg in &step.command {
            hasher.update(arg.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
