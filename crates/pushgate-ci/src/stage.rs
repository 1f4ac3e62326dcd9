//! Validation step definitions and configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default per-step timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 600;

/// Builtin validation steps for a Node project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStep {
    /// npm ci
    Install,

    /// npm run build
    Build,

    /// npm test
    Test,
}

impl BuiltinStep {
    /// All builtin steps in execution order.
    pub const ALL: [BuiltinStep; 3] = [BuiltinStep::Install, BuiltinStep::Build, BuiltinStep::Test];

    /// Get the step name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStep::Install => "install",
            BuiltinStep::Build => "build",
            BuiltinStep::Test => "test",
        }
    }

    /// Get the step's command.
    pub fn command(&self) -> Vec<String> {
        let args: &[&str] = match self {
            BuiltinStep::Install => &["npm", "ci"],
            BuiltinStep::Build => &["npm", "run", "build"],
            BuiltinStep::Test => &["npm", "test"],
        };
        args.iter().map(|a| a.to_string()).collect()
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

/// Configuration for a validation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    /// Human-readable step name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds. Zero disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Whether this step is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Working directory, relative to the repository root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl StepConfig {
    /// Create a step configuration from a builtin step.
    pub fn from_builtin(step: BuiltinStep, timeout_secs: u64) -> Self {
        Self::custom(step.name(), step.command(), timeout_secs)
    }

    /// Create a custom step configuration.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            enabled: true,
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    /// Disable this step.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// install, build, test.
pub fn default_steps() -> Vec<StepConfig> {
    BuiltinStep::ALL
        .iter()
        .map(|s| StepConfig::from_builtin(*s, DEFAULT_STEP_TIMEOUT_SECS))
        .collect()
}
