//! pushgate CI - the gated promotion pipeline
//!
//! Provides the pipeline that, for every push to a source branch:
//! - Validates the exact pushed commit through ordered steps
//! - Promotes it into the target branch when every step passes
//! - Reports the failing step to the feedback channel otherwise
//! - Records every run in the run ledger

pub mod config;
pub mod fakes;
pub mod gate;
mod journal;
pub mod notification;
pub mod pipeline;
pub mod promotion;
pub mod runner;
pub mod spec;
pub mod stage;
pub mod trigger;
pub mod validation;

// Re-export key types
pub use config::{ConfigError, PairConfig, PipelineConfig, CONFIG_ENV, DEFAULT_CONFIG_FILE};
pub use gate::{GateVerdict, ValidationGate};
pub use journal::Journal;
pub use notification::NotificationStage;
pub use pipeline::Pipeline;
pub use promotion::{PromotionPolicy, PromotionStage};
pub use runner::{ExecError, ProcessExecutor, StepExecutor, StepOutput};
pub use spec::PipelineSpec;
pub use stage::{default_steps, BuiltinStep, StepConfig};
pub use trigger::{Admission, BranchWatcher, Dispatcher, DispatcherBuilder};
pub use validation::{ExcerptLimits, ValidationStage, CHECKOUT_STEP};
