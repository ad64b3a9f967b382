pub mod backend;
pub mod cli;
pub mod filter;
pub mod pipeline;
pub mod progress;
pub mod sampler;
pub mod settings;

pub use backend::ExecutionPlan;
pub use pipeline::{PipelineConfig, RecognizerConfig, RunError, RunSummary, run_pipeline};
pub use settings::{ConfigError, EffectiveSettings, resolve_settings};
