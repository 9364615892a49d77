//! Fan-out/fan-in pipeline: allocate, build the roster, dispatch waves, reduce.
//!
//! Only malformed input (allocation table, catalog, template) is fatal and it
//! always surfaces before any unit is dispatched. Everything after that point
//! degrades into per-unit error entries and a coverage figure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::ReasoningBackend;
use crate::config::{ConfigError, SimulationConfig};
use crate::contract::OutputContract;
use crate::reducer::{
    AggregateSummary, ExpectedSegment, NarrativeReducer, Reducer, ReductionInput,
    StatisticalReducer,
};
use crate::scheduler::{CancelFlag, WaveScheduler};
use crate::task::{ResultMap, TaskUnit};
use population::template::{
    ARCHETYPE_DESC, EMERGENCY_PLAN, KNOWN_PLACEHOLDERS, PHASE_CONTENT, PHASE_NAME, SEGMENT_ID,
    SEGMENT_PROFILE,
};
use population::{
    allocate, AllocationError, ArchetypeCatalog, InstructionTemplate, Roster, RosterError,
    SegmentDescriptor, TemplateError,
};

/// Fatal pipeline errors. All of them occur before dispatch.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Roster failed: {0}")]
    Roster(#[from] RosterError),

    #[error("Template failed: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    Allocating,
    BuildingRoster,
    /// Wave `wave` (1-based) of `of` is running
    Dispatching { wave: usize, of: usize },
    Reducing,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Allocating => f.write_str("allocating"),
            Self::BuildingRoster => f.write_str("building roster"),
            Self::Dispatching { wave, of } => write!(f, "dispatching wave {} of {}", wave, of),
            Self::Reducing => f.write_str("reducing"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// One point on the emergency timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyPhase {
    /// Label, e.g. "T-48 HOURS: Tuesday 6:00 AM"
    pub name: String,
    /// Situation report for the phase
    pub content: String,
}

impl EmergencyPhase {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub phase: String,
    pub summary: AggregateSummary,
    /// Every dispatched unit's result, keyed by output key
    pub results: ResultMap,
    pub roster_fingerprint: String,
    pub waves_total: usize,
    pub waves_completed: usize,
    pub cancelled: bool,
    /// Stage transitions in order
    pub stages: Vec<PipelineStage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Reducer selected by configuration.
pub fn reducer_for(
    config: &SimulationConfig,
    backend: Arc<dyn ReasoningBackend>,
) -> Arc<dyn Reducer> {
    if config.pipeline.narrative_summary {
        Arc::new(NarrativeReducer::new(backend))
    } else {
        Arc::new(StatisticalReducer)
    }
}

/// Build a pipeline from configuration. Nothing is process-global; every
/// pipeline owns its backend, reducer and stage channel.
pub fn build_pipeline(
    config: &SimulationConfig,
    backend: Arc<dyn ReasoningBackend>,
    reducer: Arc<dyn Reducer>,
) -> Result<Pipeline, PipelineError> {
    config.validate()?;

    let template = match &config.template {
        Some(text) => InstructionTemplate::with_known(text.as_str(), KNOWN_PLACEHOLDERS)?,
        None => InstructionTemplate::default(),
    };

    let scheduler = WaveScheduler::new(backend, config.pipeline.wave_size)
        .with_unit_timeout(config.pipeline.unit_timeout());
    let (stage_tx, _) = watch::channel(PipelineStage::Init);

    Ok(Pipeline {
        catalog: config.archetypes.clone(),
        total_segments: config.pipeline.total_segments,
        template,
        emergency_plan: config.emergency_plan.clone(),
        phases: config.phases.clone(),
        contract: Arc::new(OutputContract::persona_reaction()),
        scheduler,
        reducer,
        stage_tx,
    })
}

/// A configured simulation pipeline. Runs are meant to be sequential; the
/// stage channel reflects the most recent run.
pub struct Pipeline {
    catalog: ArchetypeCatalog,
    total_segments: usize,
    template: InstructionTemplate,
    emergency_plan: String,
    phases: Vec<EmergencyPhase>,
    contract: Arc<OutputContract>,
    scheduler: WaveScheduler,
    reducer: Arc<dyn Reducer>,
    stage_tx: watch::Sender<PipelineStage>,
}

impl Pipeline {
    /// Watch stage transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineStage> {
        self.stage_tx.subscribe()
    }

    /// Current stage.
    pub fn stage(&self) -> PipelineStage {
        *self.stage_tx.borrow()
    }

    /// Configured timeline.
    pub fn phases(&self) -> &[EmergencyPhase] {
        &self.phases
    }

    /// Run one phase to completion.
    pub async fn run(&self, phase: &EmergencyPhase) -> Result<PipelineOutput, PipelineError> {
        self.run_with_cancel(phase, &CancelFlag::new()).await
    }

    /// Run one phase; `cancel` stops dispatch of further waves. A cancelled
    /// run still reduces whatever finished.
    pub async fn run_with_cancel(
        &self,
        phase: &EmergencyPhase,
        cancel: &CancelFlag,
    ) -> Result<PipelineOutput, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut stages = Vec::new();

        info!(%run_id, phase = %phase.name, total = self.total_segments, "Pipeline run started");

        let prepared = self.prepare(phase, &mut stages);
        let (roster, units) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(%run_id, error = %e, "Pipeline input rejected");
                self.stage_tx.send_replace(PipelineStage::Init);
                return Err(e);
            }
        };

        let expected: Vec<ExpectedSegment> = units
            .iter()
            .map(|u| ExpectedSegment {
                output_key: u.output_key.clone(),
                segment_id: u.segment.id.clone(),
                category: u.segment.category.clone(),
            })
            .collect();

        let outcome = self
            .scheduler
            .run_with(units, cancel, |wave, of| {
                self.transition(PipelineStage::Dispatching { wave, of }, &mut stages)
            })
            .await;

        self.transition(PipelineStage::Reducing, &mut stages);
        let input = ReductionInput::from_results(expected, &outcome.results).with_phase(&phase.name);
        let summary = self.reducer.reduce(&input).await;

        self.transition(PipelineStage::Done, &mut stages);
        info!(
            %run_id,
            reducer = self.reducer.name(),
            coverage = %summary.coverage,
            cancelled = outcome.cancelled,
            "Pipeline run finished"
        );

        Ok(PipelineOutput {
            run_id,
            phase: phase.name.clone(),
            summary,
            waves_total: outcome.waves_total(),
            waves_completed: outcome.waves_completed,
            cancelled: outcome.cancelled,
            results: outcome.results,
            roster_fingerprint: roster.fingerprint(),
            stages,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run `phases` in order. Stops after a cancelled phase.
    pub async fn run_timeline(
        &self,
        phases: &[EmergencyPhase],
        cancel: &CancelFlag,
    ) -> Result<Vec<PipelineOutput>, PipelineError> {
        let mut outputs = Vec::with_capacity(phases.len());
        for phase in phases {
            if cancel.is_cancelled() {
                break;
            }
            outputs.push(self.run_with_cancel(phase, cancel).await?);
        }
        Ok(outputs)
    }

    /// Allocation, roster and instruction rendering.
    fn prepare(
        &self,
        phase: &EmergencyPhase,
        stages: &mut Vec<PipelineStage>,
    ) -> Result<(Roster, Vec<TaskUnit>), PipelineError> {
        self.transition(PipelineStage::Allocating, stages);
        let plan = allocate(&self.catalog.categories(), self.total_segments)?;

        self.transition(PipelineStage::BuildingRoster, stages);
        let roster = Roster::build(&plan, &self.catalog)?;

        let units = roster
            .segments()
            .iter()
            .map(|segment| {
                let instruction = self.render(segment, phase)?;
                Ok(TaskUnit::new(segment.clone(), instruction, Arc::clone(&self.contract)))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        Ok((roster, units))
    }

    fn render(&self, segment: &SegmentDescriptor, phase: &EmergencyPhase) -> Result<String, PipelineError> {
        let description = self
            .catalog
            .description(&segment.category)
            .ok_or_else(|| RosterError::UnknownCategory(segment.category.clone()))?;

        let values: BTreeMap<&str, String> = [
            (EMERGENCY_PLAN, self.emergency_plan.clone()),
            (ARCHETYPE_DESC, description.to_string()),
            (PHASE_NAME, phase.name.clone()),
            (PHASE_CONTENT, phase.content.clone()),
            (SEGMENT_ID, segment.id.clone()),
            (SEGMENT_PROFILE, segment.profile()),
        ]
        .into_iter()
        .collect();

        Ok(self.template.render(&values)?)
    }

    fn transition(&self, stage: PipelineStage, stages: &mut Vec<PipelineStage>) {
        info!(%stage, "Pipeline stage");
        self.stage_tx.send_replace(stage);
        stages.push(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use population::Archetype;
    use serde_json::json;

    fn config(total: usize, wave_size: usize) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.pipeline.total_segments = total;
        config.pipeline.wave_size = wave_size;
        config
    }

    fn landfall() -> EmergencyPhase {
        EmergencyPhase::new("LANDFALL", "Eyewall onshore.")
    }

    #[tokio::test]
    async fn test_full_run() {
        let backend = Arc::new(ScriptedBackend::default());
        let pipeline =
            build_pipeline(&config(13, 6), backend.clone(), Arc::new(StatisticalReducer)).unwrap();
        let mut rx = pipeline.subscribe();

        let output = pipeline.run(&landfall()).await.unwrap();

        assert_eq!(backend.call_count(), 13);
        assert_eq!(output.results.len(), 13);
        assert_eq!(output.summary.coverage, "covered 13 of 13 segments");
        assert_eq!(output.waves_total, 3);
        assert_eq!(output.waves_completed, 3);
        assert!(!output.cancelled);
        assert_eq!(output.phase, "LANDFALL");
        assert_eq!(output.roster_fingerprint.len(), 64);
        assert_eq!(
            output.stages,
            vec![
                PipelineStage::Allocating,
                PipelineStage::BuildingRoster,
                PipelineStage::Dispatching { wave: 1, of: 3 },
                PipelineStage::Dispatching { wave: 2, of: 3 },
                PipelineStage::Dispatching { wave: 3, of: 3 },
                PipelineStage::Reducing,
                PipelineStage::Done,
            ]
        );
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PipelineStage::Done);
        assert_eq!(pipeline.stage(), PipelineStage::Done);
        // Largest remainder with input-order tie-break gives the extra seat to lowincome
        assert_eq!(output.summary.categories["lowincome"].expected, 3);
        assert_eq!(output.summary.categories["student"].expected, 2);
    }

    #[tokio::test]
    async fn test_instructions_are_rendered_per_segment() {
        let backend = Arc::new(ScriptedBackend::default());
        let pipeline =
            build_pipeline(&config(6, 6), backend.clone(), Arc::new(StatisticalReducer)).unwrap();

        pipeline.run(&landfall()).await.unwrap();

        let instructions = backend.instructions();
        assert_eq!(instructions.len(), 6);
        let retired = instructions
            .iter()
            .find(|i| i.contains("(retired_1)"))
            .unwrap();
        assert!(retired.contains("retired, high risk, socially limited"));
        assert!(retired.contains("CURRENT PHASE: LANDFALL"));
        assert!(retired.contains("Eyewall onshore."));
        assert!(retired.contains("T-72 HOURS"));
        assert!(retired.contains("employment: retired"));
        assert!(!retired.contains("{SEGMENT_ID}"));
    }

    #[tokio::test]
    async fn test_failed_segment_is_missing_from_summary() {
        let backend = Arc::new(ScriptedBackend::default().failing_on("(retired_2)"));
        let pipeline =
            build_pipeline(&config(13, 6), backend, Arc::new(StatisticalReducer)).unwrap();

        let output = pipeline.run(&landfall()).await.unwrap();

        assert_eq!(output.results.len(), 13);
        assert!(output.results["retired_2_key"].error.is_some());
        assert_eq!(output.summary.covered, 12);
        assert_eq!(output.summary.missing_keys, vec!["retired_2_key"]);
        assert_eq!(output.summary.coverage, "covered 12 of 13 segments");
    }

    #[tokio::test]
    async fn test_malformed_table_fails_before_dispatch() {
        let mut config = config(10, 5);
        config.archetypes = ArchetypeCatalog::new(vec![
            Archetype::new("a", "first", 0.8),
            Archetype::new("b", "second", -0.5),
        ])
        .unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let pipeline = build_pipeline(&config, backend.clone(), Arc::new(StatisticalReducer)).unwrap();

        let err = pipeline.run(&landfall()).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Allocation(AllocationError::NegativeProportion { .. })
        ));
        assert_eq!(backend.call_count(), 0);
        assert_eq!(pipeline.stage(), PipelineStage::Init);
    }

    #[test]
    fn test_unknown_placeholder_rejected_at_build() {
        let mut config = config(10, 5);
        config.template = Some("Hello {SEGMENT_ID}, the {WEATHER} is bad".to_string());

        let result = build_pipeline(
            &config,
            Arc::new(ScriptedBackend::default()),
            Arc::new(StatisticalReducer),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Template(TemplateError::UnknownPlaceholder(p))) if p == "WEATHER"
        ));
    }

    #[test]
    fn test_zero_wave_size_rejected_at_build() {
        let result = build_pipeline(
            &config(10, 0),
            Arc::new(ScriptedBackend::default()),
            Arc::new(StatisticalReducer),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run_still_reduces() {
        let backend = Arc::new(ScriptedBackend::default());
        let pipeline =
            build_pipeline(&config(12, 4), backend.clone(), Arc::new(StatisticalReducer)).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let output = pipeline.run_with_cancel(&landfall(), &cancel).await.unwrap();

        assert!(output.cancelled);
        assert_eq!(output.waves_completed, 0);
        assert_eq!(output.waves_total, 3);
        assert_eq!(backend.call_count(), 0);
        assert_eq!(output.summary.covered, 0);
        assert_eq!(output.summary.expected, 12);
        assert_eq!(output.stages.last(), Some(&PipelineStage::Done));
    }

    #[tokio::test]
    async fn test_timeline_runs_each_phase() {
        let mut config = config(6, 3);
        config.phases = vec![
            EmergencyPhase::new("T-48 HOURS", "Warning issued."),
            EmergencyPhase::new("T-24 HOURS", "Mandatory evacuation."),
        ];
        let backend = Arc::new(ScriptedBackend::default());
        let pipeline = build_pipeline(&config, backend.clone(), Arc::new(StatisticalReducer)).unwrap();

        let outputs = pipeline
            .run_timeline(pipeline.phases(), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].phase, "T-48 HOURS");
        assert_eq!(outputs[1].summary.phase.as_deref(), Some("T-24 HOURS"));
        assert_eq!(outputs[0].roster_fingerprint, outputs[1].roster_fingerprint);
        assert_ne!(outputs[0].run_id, outputs[1].run_id);
        assert_eq!(backend.call_count(), 12);
    }

    #[tokio::test]
    async fn test_timeline_runs_selected_phases_only() {
        let mut config = config(4, 4);
        config.phases = vec![
            EmergencyPhase::new("T-48 HOURS", "Warning issued."),
            EmergencyPhase::new("LANDFALL", "Eyewall onshore."),
        ];
        let backend = Arc::new(ScriptedBackend::default());
        let pipeline = build_pipeline(&config, backend.clone(), Arc::new(StatisticalReducer)).unwrap();

        let selected = [EmergencyPhase::new("LANDFALL", "Eyewall onshore.")];
        let outputs = pipeline.run_timeline(&selected, &CancelFlag::new()).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].phase, "LANDFALL");
        assert_eq!(backend.call_count(), 4);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let outputs = pipeline.run_timeline(pipeline.phases(), &cancel).await.unwrap();
        assert!(outputs.is_empty());
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_narrative_reducer_from_config() {
        let mut config = config(6, 6);
        config.pipeline.narrative_summary = true;
        let backend = Arc::new(
            ScriptedBackend::default()
                .responding_to("Summarize", json!({ "output": "Calm preparation overall." })),
        );
        let reducer = reducer_for(&config, backend.clone());
        assert_eq!(reducer.name(), "narrative");

        let pipeline = build_pipeline(&config, backend.clone(), reducer).unwrap();
        let output = pipeline.run(&landfall()).await.unwrap();

        assert_eq!(output.summary.narrative.as_deref(), Some("Calm preparation overall."));
        assert_eq!(backend.call_count(), 7);
    }
}
