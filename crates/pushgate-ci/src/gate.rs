//! Gate evaluation over recorded validation events.
//!
//! Used to audit a run from its ledger events alone: every started step must
//! have finished and passed.

use std::collections::HashSet;

use pushgate_core::ValidationResult;
use pushgate_state::RunEvent;
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    fn from_violations(violations: Vec<String>) -> Self {
        let passed = violations.is_empty();
        let message = if passed {
            "All steps passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };
        Self {
            passed,
            violations,
            message,
        }
    }
}

/// Validation gate rules.
pub struct ValidationGate;

impl ValidationGate {
    /// Evaluate ledger events of one run.
    ///
    /// Gate rule:
    /// - Each `step_finished` event with `passed == false` is a violation
    /// - A `step_started` with no matching `step_finished` is a violation
    pub fn evaluate(events: &[RunEvent]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut started: Vec<String> = Vec::new();
        let mut finished = HashSet::new();

        for event in events {
            let step = event.payload["step"].as_str().unwrap_or("unknown").to_string();
            match event.kind.as_str() {
                "step_started" => started.push(step),
                "step_finished" => {
                    if event.payload["passed"].as_bool() != Some(true) {
                        violations.push(format!("Step '{step}' failed"));
                    }
                    finished.insert(step);
                }
                _ => {}
            }
        }

        for step in started {
            if !finished.contains(&step) {
                violations.push(format!("Step '{step}' was started but never finished"));
            }
        }

        GateVerdict::from_violations(violations)
    }

    /// Evaluate an in-memory validation result.
    pub fn evaluate_result(result: &ValidationResult) -> GateVerdict {
        let violations = result
            .steps()
            .iter()
            .filter(|s| !s.passed())
            .map(|s| {
                if s.timed_out {
                    format!("Step '{}' timed out", s.name)
                } else {
                    format!("Step '{}' exited with code {}", s.name, s.exit_code)
                }
            })
            .collect();
        GateVerdict::from_violations(violations)
    }
}
