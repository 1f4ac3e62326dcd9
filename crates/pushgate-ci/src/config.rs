//! `pushgate.toml` configuration.
//!
//! ```toml
//! source_branch = "new"
//! target_branch = "main"
//! channel = "#deploys"
//! webhook_url = "https://hooks.example.com/pushgate"
//!
//! [[steps]]
//! name = "install"
//! command = ["npm", "ci"]
//! ```
//!
//! Every field has a default; an empty file is a valid configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pushgate_core::BranchPair;
use serde::{Deserialize, Serialize};

use crate::promotion::PromotionPolicy;
use crate::spec::PipelineSpec;
use crate::stage::{default_steps, StepConfig};
use crate::validation::ExcerptLimits;

pub const DEFAULT_CONFIG_FILE: &str = "pushgate.toml";
pub const CONFIG_ENV: &str = "PUSHGATE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// An additional source → target promotion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PairConfig {
    pub source: String,
    pub target: String,

    /// Separate checkout for this pair; defaults to the top-level `repo_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub source_branch: String,
    pub target_branch: String,
    pub remote: String,
    pub repo_dir: PathBuf,

    /// Feedback channel name passed to the notifier.
    pub channel: String,

    /// Webhook for notifications; logs only when unset.
    pub webhook_url: Option<String>,
    pub notify_timeout_secs: u64,
    pub notify_on_success: bool,

    pub excerpt_lines: usize,
    pub excerpt_bytes: usize,

    pub vcs_timeout_secs: u64,
    pub promotion_attempts: u32,
    pub retry_delay_secs: u64,

    /// Interval for `pushgate watch`.
    pub poll_interval_secs: u64,

    pub steps: Vec<StepConfig>,

    /// Extra pairs beyond `source_branch` → `target_branch`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pairs: Vec<PairConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_branch: "new".to_string(),
            target_branch: "main".to_string(),
            remote: "origin".to_string(),
            repo_dir: PathBuf::from("."),
            channel: "#ci".to_string(),
            webhook_url: None,
            notify_timeout_secs: 10,
            notify_on_success: false,
            excerpt_lines: 40,
            excerpt_bytes: 8192,
            vcs_timeout_secs: 120,
            promotion_attempts: 2,
            retry_delay_secs: 0,
            poll_interval_secs: 30,
            steps: default_steps(),
            pairs: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load `path` if given; otherwise `pushgate.toml` in the current
    /// directory when present, else the defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.steps.iter().all(|s| !s.enabled) {
            return invalid("no enabled validation steps".to_string());
        }
        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return invalid("step with an empty name".to_string());
            }
            if step.command.first().map_or(true, |c| c.trim().is_empty()) {
                return invalid(format!("step '{}' has an empty command", step.name));
            }
            if !names.insert(step.name.as_str()) {
                return invalid(format!("duplicate step name '{}'", step.name));
            }
        }
        if self.promotion_attempts == 0 {
            return invalid("promotion_attempts must be at least 1".to_string());
        }
        if self.vcs_timeout_secs == 0 {
            return invalid("vcs_timeout_secs must be at least 1".to_string());
        }

        let mut sources = HashSet::new();
        for (pair, _) in self.pairs() {
            if pair.source.trim().is_empty() || pair.target.trim().is_empty() {
                return invalid(format!("branch pair '{pair}' has an empty branch"));
            }
            if pair.source == pair.target {
                return invalid(format!(
                    "source and target branch are both '{}'",
                    pair.source
                ));
            }
            if !sources.insert(pair.source.clone()) {
                return invalid(format!(
                    "source branch '{}' is configured more than once",
                    pair.source
                ));
            }
        }
        Ok(())
    }

    /// All configured pairs with the checkout each one uses.
    pub fn pairs(&self) -> Vec<(BranchPair, PathBuf)> {
        let mut pairs = vec![(
            BranchPair::new(&self.source_branch, &self.target_branch),
            self.repo_dir.clone(),
        )];
        pairs.extend(self.pairs.iter().map(|p| {
            (
                BranchPair::new(&p.source, &p.target),
                p.repo_dir.clone().unwrap_or_else(|| self.repo_dir.clone()),
            )
        }));
        pairs
    }

    pub fn excerpt_limits(&self) -> ExcerptLimits {
        ExcerptLimits {
            lines: self.excerpt_lines,
            bytes: self.excerpt_bytes,
        }
    }

    pub fn vcs_timeout(&self) -> Duration {
        Duration::from_secs(self.vcs_timeout_secs)
    }

    pub fn promotion_policy(&self) -> PromotionPolicy {
        PromotionPolicy {
            attempts: self.promotion_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            vcs_timeout: self.vcs_timeout(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn pipeline_spec(&self, repo_dir: &Path) -> PipelineSpec {
        PipelineSpec::new(repo_dir.to_path_buf(), &self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.source_branch, "new");
        assert_eq!(config.target_branch, "main");
        assert_eq!(config.promotion_attempts, 2);
        let names: Vec<&str> = config.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["install", "build", "test"]);
    }

    #[test]
    fn steps_and_branches_parse() {
        let config = PipelineConfig::from_toml_str(
            r##"
            source_branch = "staging"
            target_branch = "production"
            channel = "#deploys"
            webhook_url = "https://hooks.example.com/x"
            promotion_attempts = 3

            [[steps]]
            name = "lint"
            command = ["npm", "run", "lint"]
            timeout_secs = 30

            [[steps]]
            name = "e2e"
            command = ["npm", "run", "e2e"]
            enabled = false
            workdir = "web"
            env = { CI = "true" }
            "##,
        )
        .unwrap();
        assert_eq!(config.source_branch, "staging");
        assert_eq!(config.steps.len(), 2);
        assert!(!config.steps[1].enabled);
        assert_eq!(config.steps[1].env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(config.promotion_policy().attempts, 3);
        assert_eq!(config.webhook_url.as_deref(), Some("https://hooks.example.com/x"));
    }

    #[test]
    fn unknown_field_rejected() {
        let err = PipelineConfig::from_toml_str("sorce_branch = \"new\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_step_list_rejected() {
        let err = PipelineConfig::from_toml_str("steps = []").unwrap_err();
        assert!(err.to_string().contains("no enabled validation steps"));
    }

    #[test]
    fn empty_command_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[steps]]
            name = "build"
            command = []
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn duplicate_step_names_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[steps]]
            name = "build"
            command = ["make"]

            [[steps]]
            name = "build"
            command = ["make", "all"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn same_source_and_target_rejected() {
        let err = PipelineConfig::from_toml_str("target_branch = \"new\"").unwrap_err();
        assert!(err.to_string().contains("both 'new'"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = PipelineConfig::from_toml_str("promotion_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn zero_vcs_timeout_rejected() {
        let err = PipelineConfig::from_toml_str("vcs_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("vcs_timeout_secs must be at least 1"));
    }

    #[test]
    fn extra_pairs_inherit_repo_dir() {
        let config = PipelineConfig::from_toml_str(
            r#"
            repo_dir = "/srv/site"

            [[pairs]]
            source = "docs-staging"
            target = "docs"
            "#,
        )
        .unwrap();
        let pairs = config.pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0, BranchPair::new("docs-staging", "docs"));
        assert_eq!(pairs[1].1, PathBuf::from("/srv/site"));
    }

    #[test]
    fn duplicate_source_across_pairs_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[pairs]]
            source = "new"
            target = "release"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn load_reads_file_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "channel = \"#ops\"\n").unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().channel, "#ops");

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            PipelineConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn rendered_config_parses_back() {
        let config = PipelineConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
