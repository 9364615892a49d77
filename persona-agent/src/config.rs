//! Configuration for a simulation run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pipeline::EmergencyPhase;
use population::ArchetypeCatalog;

/// Errors raised while loading or checking configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// YAML could not be parsed or written
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Built-in emergency plan shared by every segment.
pub const DEFAULT_EMERGENCY_PLAN: &str = "\
T-72 HOURS: Hurricane watch. Residents should review evacuation zones, refill prescriptions and secure 7 days of water and food.
T-48 HOURS: Hurricane warning. Voluntary evacuation of zones A and B; public shelters open at 6:00 PM; fuel stations extend hours.
T-24 HOURS: Mandatory evacuation of zones A and B. Contraflow on outbound highways. Para-transit pickups for registered residents end at noon.
LANDFALL: Shelter in place. Emergency services suspended while sustained winds exceed 45 mph.
T+24 HOURS: Search and rescue begins. Boil-water notice. Points of distribution open for water, ice and tarps.";

/// Complete configuration of a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fan-out settings
    pub pipeline: PipelineConfig,
    /// Population strata and proportions
    pub archetypes: ArchetypeCatalog,
    /// Instruction template; `None` uses the built-in one
    pub template: Option<String>,
    /// Plan text substituted for `{EMERGENCY_PLAN}`
    pub emergency_plan: String,
    /// Timeline phases, run in order
    pub phases: Vec<EmergencyPhase>,
    /// Reasoning backend settings
    pub backend: BackendConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            archetypes: ArchetypeCatalog::hurricane_defaults(),
            template: None,
            emergency_plan: DEFAULT_EMERGENCY_PLAN.to_string(),
            phases: default_phases(),
            backend: BackendConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Load config from YAML. Missing sections fall back to defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.wave_size == 0 {
            return Err(ConfigError::Invalid("pipeline.wave_size must be at least 1".to_string()));
        }
        if self.pipeline.unit_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.unit_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(phase) = self.phases.iter().find(|p| p.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "phase with empty name (content: {:.40})",
                phase.content
            )));
        }
        self.archetypes
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&EmergencyPhase> {
        self.phases.iter().find(|p| p.name == name)
    }
}

/// Fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Population size to allocate
    pub total_segments: usize,
    /// Maximum concurrent units per wave
    pub wave_size: usize,
    /// Per-unit deadline (ms)
    pub unit_timeout_ms: u64,
    /// Ask the backend for a narrative summary after reduction
    pub narrative_summary: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_segments: 50,
            wave_size: 6,
            unit_timeout_ms: 60_000,
            narrative_summary: false,
        }
    }
}

impl PipelineConfig {
    /// Per-unit deadline as a duration.
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }
}

/// OpenAI-compatible backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API base URL, up to and including `/v1`
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
            api_key_env: None,
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

/// The built-in hurricane timeline.
pub fn default_phases() -> Vec<EmergencyPhase> {
    vec![
        EmergencyPhase::new(
            "T-72 HOURS: Monday 6:00 AM",
            "HURRICANE WATCH - A Category 3 storm is forecast to reach the coast in three days. \
             Stores report heavy demand for water and plywood.",
        ),
        EmergencyPhase::new(
            "T-48 HOURS: Tuesday 6:00 AM",
            "HURRICANE WARNING ISSUED - Storm maintaining Category 4 strength. \
             Voluntary evacuation of low-lying zones; shelters open tonight.",
        ),
        EmergencyPhase::new(
            "T-24 HOURS: Wednesday 6:00 AM",
            "MANDATORY EVACUATION for zones A and B. Outbound highways congested; \
             several gas stations are out of fuel.",
        ),
        EmergencyPhase::new(
            "LANDFALL: Thursday 6:00 AM",
            "Eyewall onshore. Widespread power outages, storm surge of 9 to 12 feet. \
             Emergency services suspended.",
        ),
        EmergencyPhase::new(
            "T+24 HOURS: Friday 6:00 AM",
            "Storm has passed. Roads blocked by debris, boil-water notice in effect, \
             distribution points opening for water and ice.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.pipeline.total_segments, 50);
        assert_eq!(config.pipeline.wave_size, 6);
        assert_eq!(config.pipeline.unit_timeout(), Duration::from_secs(60));
        assert_eq!(config.archetypes.len(), 6);
        assert_eq!(config.phases.len(), 5);
        assert!(config.template.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
pipeline:
  total_segments: 12
backend:
  model: qwen2.5
  api_key_env: SIM_API_KEY
"#;
        let config = SimulationConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pipeline.total_segments, 12);
        assert_eq!(config.pipeline.wave_size, 6);
        assert_eq!(config.backend.model, "qwen2.5");
        assert_eq!(config.backend.base_url, "http://localhost:11434/v1");
        assert_eq!(config.backend.api_key_env.as_deref(), Some("SIM_API_KEY"));
        assert_eq!(config.archetypes.len(), 6);
    }

    #[test]
    fn test_zero_wave_size_rejected() {
        let err = SimulationConfig::from_yaml("pipeline:\n  wave_size: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = SimulationConfig::default();
        config.pipeline.wave_size = 3;
        config.template = Some("{SEGMENT_ID} during {PHASE_NAME}".to_string());

        let yaml = config.to_yaml().unwrap();
        let parsed = SimulationConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.pipeline.wave_size, 3);
        assert_eq!(parsed.template, config.template);
        assert_eq!(parsed.phases, config.phases);
    }

    #[test]
    fn test_phase_lookup() {
        let config = SimulationConfig::default();
        assert!(config.phase("LANDFALL: Thursday 6:00 AM").is_some());
        assert!(config.phase("T+96 HOURS").is_none());
    }
}
