//! Flow Sim - chained calls against an agent session service
//!
//! Replays the canonical client sequence (create session, list evaluation
//! sets and results, list sessions, submit a run) and reports every step:
//! - `TargetService` trait with a reqwest implementation
//! - Session id extraction with a fixed fallback
//! - Fatal session creation transport failure, best-effort remaining steps
//! - HTTP error statuses recorded as responses, never as step failures

pub mod client;
pub mod flow;
pub mod session;

pub use client::{
    decode_body, HttpTargetService, StepError, StepMethod, StepRequest, StepResponse,
    TargetService,
};
pub use flow::{
    default_new_message, FlowReport, FlowRequest, FlowSimulator, FlowStatus, FlowStep,
    FlowStepRecord, StepStatus,
};
pub use session::{extract_session_id, DEFAULT_SESSION_ID};
