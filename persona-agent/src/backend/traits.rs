//! Core trait for reasoning backends.
//!
//! This module defines `ReasoningBackend` - the one capability the pipeline
//! consumes: turn a rendered instruction plus an output contract into a
//! structured JSON object, or fail.

use async_trait::async_trait;

use crate::contract::{ContractViolation, OutputContract};

/// Error types for a single reasoning invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvocationError {
    /// Backend is not available
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Request failed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Rate limited by the backend
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Response was not a JSON object
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Response did not satisfy the output contract
    #[error("Contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),

    /// No answer within the unit deadline
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// A remote (or local) capability that answers one instruction at a time.
///
/// Implementations may be rate limited and may fail; callers treat every
/// failure as isolated to the invocation that produced it.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Backend identifier (e.g., model name).
    fn id(&self) -> &str;

    /// Produce a structured object for `instruction` shaped by `contract`.
    async fn invoke(
        &self,
        instruction: &str,
        contract: &OutputContract,
    ) -> Result<serde_json::Value, InvocationError>;
}
