//! Command-line arguments and their mapping onto configuration.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use flow_sim::FlowRequest;
use persona_agent::{EmergencyPhase, SimulationConfig};

#[derive(Parser)]
#[command(name = "hurricane-sim")]
#[command(about = "Population reaction simulations and session flow checks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the persona pipeline for one phase or the whole timeline
    Run(RunArgs),
    /// Print the allocation and roster without calling a backend
    Roster(RosterArgs),
    /// Replay the session flow against an agent service
    Flow(FlowArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to YAML configuration
    #[arg(short, long, env = "HURRICANE_SIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Phase name to run (default: every configured phase)
    #[arg(long)]
    pub phase: Option<String>,

    /// Write JSON output here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Population size (overrides config file)
    #[arg(long)]
    pub total: Option<usize>,

    /// Wave size (overrides config file)
    #[arg(long)]
    pub wave_size: Option<usize>,

    /// Per-unit timeout in milliseconds (overrides config file)
    #[arg(long)]
    pub unit_timeout_ms: Option<u64>,

    /// Backend base URL (overrides config file)
    #[arg(long, env = "HURRICANE_SIM_BASE_URL")]
    pub base_url: Option<String>,

    /// Backend model (overrides config file)
    #[arg(long, env = "HURRICANE_SIM_MODEL")]
    pub model: Option<String>,

    /// Ask the backend for a narrative summary
    #[arg(long)]
    pub narrative: bool,
}

#[derive(Args, Debug, Default)]
pub struct RosterArgs {
    /// Path to YAML configuration
    #[arg(short, long, env = "HURRICANE_SIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Population size (overrides config file)
    #[arg(long)]
    pub total: Option<usize>,

    /// Include every segment's attributes
    #[arg(long)]
    pub segments: bool,
}

#[derive(Args, Debug, Default)]
pub struct FlowArgs {
    /// Base URL of the agent service
    #[arg(long, default_value = "http://localhost:8000", env = "HURRICANE_SIM_TARGET")]
    pub base_url: String,

    #[arg(long)]
    pub app_name: Option<String>,

    #[arg(long)]
    pub user_id: Option<String>,

    /// JSON message for the run step
    #[arg(long)]
    pub message: Option<String>,

    #[arg(long)]
    pub streaming: bool,

    /// Per-step timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub step_timeout_ms: u64,
}

/// Load configuration from a YAML file, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SimulationConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            SimulationConfig::from_yaml(&content)
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(SimulationConfig::default()),
    }
}

/// Apply run flags on top of file values.
pub fn apply_run_overrides(config: &mut SimulationConfig, args: &RunArgs) -> anyhow::Result<()> {
    if let Some(total) = args.total {
        config.pipeline.total_segments = total;
    }
    if let Some(wave_size) = args.wave_size {
        config.pipeline.wave_size = wave_size;
    }
    if let Some(timeout) = args.unit_timeout_ms {
        config.pipeline.unit_timeout_ms = timeout;
    }
    if let Some(base_url) = &args.base_url {
        config.backend.base_url = base_url.clone();
    }
    if let Some(model) = &args.model {
        config.backend.model = model.clone();
    }
    if args.narrative {
        config.pipeline.narrative_summary = true;
    }
    config.validate()?;
    Ok(())
}

/// Phases selected by `--phase`, or the whole timeline.
pub fn select_phases(config: &SimulationConfig, name: Option<&str>) -> anyhow::Result<Vec<EmergencyPhase>> {
    match name {
        Some(name) => config
            .phase(name)
            .cloned()
            .map(|phase| vec![phase])
            .with_context(|| format!("no phase named {:?} in configuration", name)),
        None => Ok(config.phases.clone()),
    }
}

/// Build the flow request from flags.
pub fn flow_request(args: &FlowArgs) -> anyhow::Result<FlowRequest> {
    let mut request = FlowRequest::default();
    if let Some(app) = &args.app_name {
        request.app_name = app.clone();
    }
    if let Some(user) = &args.user_id {
        request.user_id = user.clone();
    }
    if let Some(message) = &args.message {
        request.new_message =
            Some(serde_json::from_str(message).context("--message must be a JSON object")?);
    }
    request.streaming = args.streaming;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "pipeline:\n  total_segments: 18\n  wave_size: 4\nphases:\n  - name: LANDFALL\n    content: Eyewall onshore."
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.total_segments, 18);
        assert_eq!(config.pipeline.wave_size, 4);
        assert_eq!(config.phases.len(), 1);
        assert_eq!(config.archetypes.len(), 6);
    }

    #[test]
    fn test_sample_config_parses() {
        let config = SimulationConfig::from_yaml(include_str!("../hurricane-sim.yaml")).unwrap();
        assert_eq!(config.archetypes.len(), 4);
        assert_eq!(config.phases.len(), 2);
        assert!(config.pipeline.narrative_summary);
        assert_eq!(config.archetypes.get("retired").unwrap().overrides.len(), 2);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(load_config(Some(&missing)).is_err());
        assert!(load_config(None).is_ok());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = SimulationConfig::default();
        let args = RunArgs {
            total: Some(7),
            wave_size: Some(2),
            model: Some("qwen2.5".to_string()),
            narrative: true,
            ..Default::default()
        };

        apply_run_overrides(&mut config, &args).unwrap();

        assert_eq!(config.pipeline.total_segments, 7);
        assert_eq!(config.pipeline.wave_size, 2);
        assert_eq!(config.backend.model, "qwen2.5");
        assert!(config.pipeline.narrative_summary);
    }

    #[test]
    fn test_zero_wave_size_flag_rejected() {
        let mut config = SimulationConfig::default();
        let args = RunArgs {
            wave_size: Some(0),
            ..Default::default()
        };
        assert!(apply_run_overrides(&mut config, &args).is_err());
    }

    #[test]
    fn test_select_phases() {
        let config = SimulationConfig::default();
        assert_eq!(select_phases(&config, None).unwrap().len(), 5);
        let landfall = select_phases(&config, Some("LANDFALL: Thursday 6:00 AM")).unwrap();
        assert_eq!(landfall.len(), 1);
        assert!(select_phases(&config, Some("T+96")).is_err());
    }

    #[test]
    fn test_flow_request_from_flags() {
        let args = FlowArgs {
            app_name: Some("evac-app".to_string()),
            message: Some(r#"{"parts":[{"text":"status?"}],"role":"user"}"#.to_string()),
            ..Default::default()
        };
        let request = flow_request(&args).unwrap();
        assert_eq!(request.app_name, "evac-app");
        assert_eq!(request.user_id, "user");
        assert_eq!(request.new_message.unwrap()["role"], "user");

        let bad = FlowArgs {
            message: Some("not json".to_string()),
            ..Default::default()
        };
        assert!(flow_request(&bad).is_err());
    }
}
