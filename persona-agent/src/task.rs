//! Task units and their results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::contract::OutputContract;
use population::SegmentDescriptor;

/// Results keyed by output key.
pub type ResultMap = BTreeMap<String, TaskResult>;

/// Output key for a segment, `{segment_id}_key`.
pub fn output_key_for(segment_id: &str) -> String {
    format!("{}_key", segment_id)
}

/// One independent reasoning job: a segment, its instruction and the
/// contract its answer must satisfy.
#[derive(Debug, Clone)]
pub struct TaskUnit {
    /// Segment this unit speaks for
    pub segment: SegmentDescriptor,
    /// Fully rendered instruction
    pub instruction: String,
    /// Unique key the result is stored under
    pub output_key: String,
    /// Expected result shape
    pub contract: Arc<OutputContract>,
}

impl TaskUnit {
    /// Create a unit; the output key is derived from the segment id.
    pub fn new(
        segment: SegmentDescriptor,
        instruction: impl Into<String>,
        contract: Arc<OutputContract>,
    ) -> Self {
        Self {
            output_key: output_key_for(&segment.id),
            segment,
            instruction: instruction.into(),
            contract,
        }
    }
}

/// Outcome of one task unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub output_key: String,
    pub segment_id: String,
    pub category: String,
    /// Structured answer; absent on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Failure description; absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 1-based wave the unit ran in
    pub wave: usize,
    pub duration_ms: u64,
}

impl TaskResult {
    /// Successful result for a unit.
    pub fn succeeded(unit: &TaskUnit, value: Value, wave: usize, duration_ms: u64) -> Self {
        Self {
            output_key: unit.output_key.clone(),
            segment_id: unit.segment.id.clone(),
            category: unit.segment.category.clone(),
            value: Some(value),
            error: None,
            wave,
            duration_ms,
        }
    }

    /// Failed result for a unit.
    pub fn failed(unit: &TaskUnit, error: impl Into<String>, wave: usize, duration_ms: u64) -> Self {
        Self {
            output_key: unit.output_key.clone(),
            segment_id: unit.segment.id.clone(),
            category: unit.segment.category.clone(),
            value: None,
            error: Some(error.into()),
            wave,
            duration_ms,
        }
    }

    /// Whether the unit produced a value.
    pub fn is_success(&self) -> bool {
        self.value.is_some() && self.error.is_none()
    }
}
