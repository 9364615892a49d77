//! Scripted backend for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::*;
use crate::contract::OutputContract;

/// Scripted backend for tests.
///
/// Answers with a fixed object, fails for instructions containing a marker,
/// and records how many calls were in flight at once.
pub struct ScriptedBackend {
    model_id: String,
    response: Value,
    overrides: Vec<(String, Value)>,
    failing: Vec<String>,
    delay: Duration,
    call_count: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Create a new scripted backend.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            response: json!({
                "race": "White",
                "age": 45,
                "sex": "female",
                "response": "Stocking water and watching the forecast.",
                "current_location": "home",
            }),
            overrides: Vec::new(),
            failing: Vec::new(),
            delay: Duration::ZERO,
            call_count: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            instructions: Mutex::new(Vec::new()),
        }
    }

    /// Set the default response.
    pub fn with_response(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    /// Answer with `response` when the instruction contains `marker`.
    pub fn responding_to(mut self, marker: impl Into<String>, response: Value) -> Self {
        self.overrides.push((marker.into(), response));
        self
    }

    /// Fail every instruction that contains `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.failing.push(marker.into());
        self
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get the number of times invoke was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Instructions received, in call order.
    pub fn instructions(&self) -> Vec<String> {
        self.instructions
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new("scripted-model")
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn invoke(
        &self,
        instruction: &str,
        _contract: &OutputContract,
    ) -> Result<Value, InvocationError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.instructions.lock() {
            seen.push(instruction.to_string());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(marker) = self.failing.iter().find(|m| instruction.contains(m.as_str())) {
            return Err(InvocationError::RequestFailed(format!(
                "scripted failure for {}",
                marker
            )));
        }

        Ok(self
            .overrides
            .iter()
            .find(|(m, _)| instruction.contains(m.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.response.clone()))
    }
}
