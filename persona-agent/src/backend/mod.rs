//! Reasoning backend abstraction layer.
//!
//! Provides a trait-based interface for the capability that answers one
//! segment's instruction:
//! - OpenAI-compatible chat APIs (vLLM, Ollama, OpenAI, etc.)
//! - Scripted backend for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::ScriptedBackend;
pub use openai::ChatBackend;
pub use traits::{InvocationError, ReasoningBackend};
