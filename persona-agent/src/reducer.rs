//! Reduction stage - fold every present per-segment result into one summary.
//!
//! Missing or failed segments are never synthesized; the summary records the
//! coverage instead. Reduction input is keyed by output key in sorted order,
//! so the outcome does not depend on the order results arrived in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::ReasoningBackend;
use crate::contract::OutputContract;
use crate::task::ResultMap;

/// A segment the run expected to hear from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedSegment {
    pub output_key: String,
    pub segment_id: String,
    pub category: String,
}

/// A successful result admitted to reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentResult {
    pub category: String,
    pub value: Value,
}

/// Expected keys plus the successful subset of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReductionInput {
    phase: Option<String>,
    expected: BTreeMap<String, ExpectedSegment>,
    present: BTreeMap<String, PresentResult>,
}

impl ReductionInput {
    /// Start from the expected segments, with nothing present yet.
    pub fn new(expected: impl IntoIterator<Item = ExpectedSegment>) -> Self {
        Self {
            phase: None,
            expected: expected
                .into_iter()
                .map(|e| (e.output_key.clone(), e))
                .collect(),
            present: BTreeMap::new(),
        }
    }

    /// Admit every successful result whose key is expected.
    pub fn from_results(
        expected: impl IntoIterator<Item = ExpectedSegment>,
        results: &ResultMap,
    ) -> Self {
        let mut input = Self::new(expected);
        for (key, result) in results.iter().filter(|(_, r)| r.is_success()) {
            if let Some(value) = &result.value {
                input.admit(key, value.clone());
            }
        }
        input
    }

    /// Set the phase label carried into the summary.
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Admit one successful value. Unexpected keys are ignored.
    pub fn admit(&mut self, key: &str, value: Value) -> bool {
        match self.expected.get(key) {
            Some(expected) => {
                self.present.insert(
                    key.to_string(),
                    PresentResult {
                        category: expected.category.clone(),
                        value,
                    },
                );
                true
            }
            None => false,
        }
    }

    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn expected(&self) -> &BTreeMap<String, ExpectedSegment> {
        &self.expected
    }

    pub fn present(&self) -> &BTreeMap<String, PresentResult> {
        &self.present
    }

    /// Expected keys without a successful result, sorted.
    pub fn missing_keys(&self) -> Vec<String> {
        self.expected
            .keys()
            .filter(|k| !self.present.contains_key(*k))
            .cloned()
            .collect()
    }
}

/// Aggregates for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub expected: usize,
    pub covered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_age: Option<f64>,
    pub sex: BTreeMap<String, usize>,
    pub locations: BTreeMap<String, usize>,
}

/// The single result of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub expected: usize,
    pub covered: usize,
    /// Human-readable coverage, e.g. "covered 8 of 10 segments"
    pub coverage: String,
    pub missing_keys: Vec<String>,
    pub categories: BTreeMap<String, CategorySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative_error: Option<String>,
}

impl AggregateSummary {
    /// Whether every expected segment contributed.
    pub fn is_complete(&self) -> bool {
        self.covered == self.expected
    }
}

/// Combines a reduction input into one summary.
#[async_trait]
pub trait Reducer: Send + Sync {
    /// Reducer name for logs.
    fn name(&self) -> &str;

    /// Reduce. Never fails; partial coverage is reported in the summary.
    async fn reduce(&self, input: &ReductionInput) -> AggregateSummary;
}

/// Deterministic counting reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalReducer;

impl StatisticalReducer {
    /// The synchronous reduction both reducers share.
    pub fn summarize(input: &ReductionInput) -> AggregateSummary {
        let mut categories: BTreeMap<String, CategorySummary> = BTreeMap::new();
        let mut age_totals: BTreeMap<String, (i64, usize)> = BTreeMap::new();

        for expected in input.expected().values() {
            categories.entry(expected.category.clone()).or_default().expected += 1;
        }

        for present in input.present().values() {
            let summary = categories.entry(present.category.clone()).or_default();
            summary.covered += 1;

            if let Some(sex) = present.value.get("sex").and_then(Value::as_str) {
                *summary.sex.entry(sex.to_lowercase()).or_insert(0) += 1;
            }
            if let Some(location) = present.value.get("current_location").and_then(Value::as_str) {
                *summary.locations.entry(location.to_lowercase()).or_insert(0) += 1;
            }
            if let Some(age) = present.value.get("age").and_then(age_of) {
                let entry = age_totals.entry(present.category.clone()).or_insert((0, 0));
                entry.0 += age;
                entry.1 += 1;
            }
        }

        for (category, (sum, count)) in age_totals {
            if let Some(summary) = categories.get_mut(&category) {
                summary.mean_age = Some(sum as f64 / count as f64);
            }
        }

        let expected = input.expected().len();
        let covered = input.present().len();

        AggregateSummary {
            phase: input.phase().map(String::from),
            expected,
            covered,
            coverage: format!("covered {} of {} segments", covered, expected),
            missing_keys: input.missing_keys(),
            categories,
            narrative: None,
            narrative_error: None,
        }
    }
}

fn age_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

#[async_trait]
impl Reducer for StatisticalReducer {
    fn name(&self) -> &str {
        "statistical"
    }

    async fn reduce(&self, input: &ReductionInput) -> AggregateSummary {
        let summary = Self::summarize(input);
        info!(coverage = %summary.coverage, "Reduction complete");
        summary
    }
}

/// Statistical summary plus a backend-written narrative of overall sentiment.
pub struct NarrativeReducer {
    backend: Arc<dyn ReasoningBackend>,
    contract: OutputContract,
}

impl NarrativeReducer {
    /// Create a narrative reducer over a backend.
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self {
            backend,
            contract: OutputContract::narrative_summary(),
        }
    }

    /// Instruction over the canonical (key-sorted) present results.
    pub fn build_instruction(input: &ReductionInput, coverage: &str) -> String {
        let records: BTreeMap<&String, &Value> =
            input.present().iter().map(|(k, p)| (k, &p.value)).collect();
        let records = serde_json::to_string_pretty(&records).unwrap_or_default();

        let mut prompt = String::new();
        prompt.push_str("Summarize the overall sentiment of all the population subsets");
        if let Some(phase) = input.phase() {
            prompt.push_str(&format!(" during phase \"{}\"", phase));
        }
        prompt.push_str(".\n\n");
        prompt.push_str(&format!("Coverage: {}. ", coverage));
        prompt.push_str("Segments that are missing failed to respond; do not invent them.\n\n");
        prompt.push_str("Input JSON objects keyed by segment:\n");
        prompt.push_str(&records);
        prompt.push_str("\n\nReturn ONLY this JSON object: {\"output\": str}\n");
        prompt
    }
}

#[async_trait]
impl Reducer for NarrativeReducer {
    fn name(&self) -> &str {
        "narrative"
    }

    async fn reduce(&self, input: &ReductionInput) -> AggregateSummary {
        let mut summary = StatisticalReducer::summarize(input);

        if input.present().is_empty() {
            summary.narrative_error = Some("no segment results to summarize".to_string());
            return summary;
        }

        let instruction = Self::build_instruction(input, &summary.coverage);
        let narrative = self
            .backend
            .invoke(&instruction, &self.contract)
            .await
            .and_then(|value| {
                self.contract.validate(&value)?;
                Ok(value)
            });

        match narrative {
            Ok(value) => {
                summary.narrative = value.get("output").and_then(Value::as_str).map(String::from);
            }
            Err(e) => {
                warn!(error = %e, "Narrative reduction failed, keeping statistics only");
                summary.narrative_error = Some(e.to_string());
            }
        }

        info!(coverage = %summary.coverage, narrative = summary.narrative.is_some(), "Reduction complete");
        summary
    }
}
