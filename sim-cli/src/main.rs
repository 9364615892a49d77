//! hurricane-sim: population reaction simulations from the command line
//!
//! - `run`: allocate a population, fan one instruction per segment out to a
//!   reasoning backend in waves and print the per-phase summaries
//! - `roster`: show the allocation and the generated segments only
//! - `flow`: replay the session flow against an agent service

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use cli::{Cli, Command, FlowArgs, RosterArgs, RunArgs};
use flow_sim::{FlowSimulator, FlowStatus, HttpTargetService};
use persona_agent::{build_pipeline, reducer_for, CancelFlag, ChatBackend, ReasoningBackend};
use population::{allocate, Roster};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hurricane_sim=info".parse()?)
                .add_directive("persona_agent=info".parse()?)
                .add_directive("flow_sim=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Roster(args) => roster(args),
        Command::Flow(args) => flow(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = cli::load_config(args.config.as_deref())?;
    cli::apply_run_overrides(&mut config, &args)?;
    let phases = cli::select_phases(&config, args.phase.as_deref())?;

    info!(
        total = config.pipeline.total_segments,
        wave_size = config.pipeline.wave_size,
        model = %config.backend.model,
        phases = phases.len(),
        "Starting simulation"
    );

    let backend: Arc<dyn ReasoningBackend> = Arc::new(ChatBackend::from_config(&config.backend)?);
    let reducer = reducer_for(&config, Arc::clone(&backend));
    let pipeline = build_pipeline(&config, backend, reducer)?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current wave");
            on_signal.cancel();
        }
    });

    let outputs = pipeline.run_timeline(&phases, &cancel).await?;

    let rendered = serde_json::to_string_pretty(&outputs)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!(path = %path.display(), runs = outputs.len(), "Output written");
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn roster(args: RosterArgs) -> anyhow::Result<()> {
    let mut config = cli::load_config(args.config.as_deref())?;
    if let Some(total) = args.total {
        config.pipeline.total_segments = total;
    }

    let plan = allocate(&config.archetypes.categories(), config.pipeline.total_segments)?;
    let roster = Roster::build(&plan, &config.archetypes)?;

    let counts: serde_json::Map<String, serde_json::Value> =
        plan.iter().map(|(name, count)| (name.to_string(), json!(count))).collect();
    let mut report = json!({
        "total": plan.total(),
        "allocation": counts,
        "fingerprint": roster.fingerprint(),
    });
    if args.segments {
        report["segments"] = serde_json::to_value(roster.segments())?;
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn flow(args: FlowArgs) -> anyhow::Result<()> {
    let request = cli::flow_request(&args)?;
    let timeout = Duration::from_millis(args.step_timeout_ms);
    let service = HttpTargetService::new(&args.base_url, timeout)?;

    info!(target_url = %service.base_url(), app = %request.app_name, "Simulating flow");

    let report = FlowSimulator::new(Arc::new(service))
        .with_step_timeout(timeout)
        .run(&request)
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status != FlowStatus::Ok {
        warn!(failed = report.failed_steps(), aborted = report.aborted, "Flow finished with failures");
    }
    Ok(())
}
