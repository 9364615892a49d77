//! Persona Agent - wave-scheduled persona reasoning
//!
//! Fans one instruction per population segment out to a reasoning backend
//! and folds the answers back into a single summary:
//! - Trait-based reasoning backends (OpenAI-compatible chat, scripted)
//! - Output contracts enforced on every structured answer
//! - Bounded concurrency through fixed-size waves
//! - Fault isolation: a failed unit is an error entry, never a failed run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Pipeline                  │
//! │  allocate → roster → waves → reduce     │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌──────────────────┐   ┌─────────────┐
//! │ WaveScheduler    │   │ Reducer     │
//! │ (ReasoningBackend│   │ (Statistical│
//! │  per unit)       │   │  Narrative) │
//! └──────────────────┘   └─────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod contract;
pub mod pipeline;
pub mod reducer;
pub mod scheduler;
pub mod task;

// Re-export main types for convenience
pub use backend::{ChatBackend, InvocationError, ReasoningBackend, ScriptedBackend};
pub use config::{BackendConfig, ConfigError, PipelineConfig, SimulationConfig};
pub use contract::{ContractViolation, FieldKind, OutputContract};
pub use pipeline::{
    build_pipeline, reducer_for, EmergencyPhase, Pipeline, PipelineError, PipelineOutput,
    PipelineStage,
};
pub use reducer::{
    AggregateSummary, CategorySummary, NarrativeReducer, Reducer, ReductionInput,
    StatisticalReducer,
};
pub use scheduler::{plan_waves, CancelFlag, ScheduleOutcome, WaveScheduler};
pub use task::{output_key_for, ResultMap, TaskResult, TaskUnit};
