//! Validation step results.

use serde::{Deserialize, Serialize};

/// Bounded tail of a step's combined stdout/stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputExcerpt {
    /// The retained text (last lines of the output).
    pub text: String,

    /// Whether anything was dropped from the front.
    pub truncated: bool,

    /// Number of lines in the full output.
    pub total_lines: usize,
}

impl OutputExcerpt {
    /// Keep the last `max_lines` lines of `output`, then at most the last
    /// `max_bytes` bytes of those (cut on a char boundary).
    pub fn capture(output: &str, max_lines: usize, max_bytes: usize) -> Self {
        let lines: Vec<&str> = output.lines().collect();
        let total_lines = lines.len();
        let keep_from = total_lines.saturating_sub(max_lines);
        let mut text = lines[keep_from..].join("\n");
        let mut truncated = keep_from > 0;

        if text.len() > max_bytes {
            let mut cut = text.len() - max_bytes;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
            text = text[cut..].to_string();
            truncated = true;
        }

        Self {
            text,
            truncated,
            total_lines,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Outcome of one validation step. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name (e.g. "install", "build", "test").
    pub name: String,

    /// Exit code; -1 when the step could not be spawned or was killed.
    pub exit_code: i32,

    /// Bounded output tail.
    pub output: OutputExcerpt,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the step hit its timeout.
    #[serde(default)]
    pub timed_out: bool,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Ordered step results for one run.
///
/// Validation stops at the first failing step, so at most the last entry
/// has failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    steps: Vec<StepResult>,
    success: bool,
}

impl ValidationResult {
    pub fn from_steps(steps: Vec<StepResult>) -> Self {
        let success = steps.iter().all(StepResult::passed);
        Self { steps, success }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// The step that stopped validation, if any.
    pub fn failing_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.passed())
    }

    pub fn duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }
}
