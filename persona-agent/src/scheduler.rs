//! Wave scheduler - bounded fan-out of task units.
//!
//! Units are split into fixed-size waves in input order. Every unit of a wave
//! runs concurrently; the next wave starts only once all of them finished.
//! Peak outstanding work therefore never exceeds the wave size.

use futures::future::join_all;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::backend::{InvocationError, ReasoningBackend};
use crate::task::{ResultMap, TaskResult, TaskUnit};

/// Default per-unit deadline.
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Index ranges of each wave for `len` units. A zero wave size is treated as 1.
pub fn plan_waves(len: usize, wave_size: usize) -> Vec<Range<usize>> {
    let size = wave_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Shared cancellation flag, checked before each wave is dispatched.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. In-flight units still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of scheduling a batch of units.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOutcome {
    /// Results of every dispatched unit
    pub results: ResultMap,
    /// Planned size of each wave
    pub wave_sizes: Vec<usize>,
    /// Waves that ran to completion
    pub waves_completed: usize,
    /// Whether dispatch stopped early on cancellation
    pub cancelled: bool,
}

impl ScheduleOutcome {
    /// Number of planned waves.
    pub fn waves_total(&self) -> usize {
        self.wave_sizes.len()
    }

    /// Units that produced a value.
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Units that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Runs task units against a backend in sequential waves.
pub struct WaveScheduler {
    backend: Arc<dyn ReasoningBackend>,
    wave_size: usize,
    unit_timeout: Duration,
}

impl WaveScheduler {
    /// Create a scheduler. A zero wave size is treated as 1.
    pub fn new(backend: Arc<dyn ReasoningBackend>, wave_size: usize) -> Self {
        Self {
            backend,
            wave_size: wave_size.max(1),
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }

    /// Set the per-unit deadline.
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Configured wave size.
    pub fn wave_size(&self) -> usize {
        self.wave_size
    }

    /// Run all units to completion.
    pub async fn run(&self, units: Vec<TaskUnit>) -> ScheduleOutcome {
        self.run_with(units, &CancelFlag::new(), |_, _| {}).await
    }

    /// Run units, checking `cancel` before each wave and calling
    /// `on_wave(k, total)` as wave `k` (1-based) is dispatched.
    pub async fn run_with<F>(
        &self,
        units: Vec<TaskUnit>,
        cancel: &CancelFlag,
        mut on_wave: F,
    ) -> ScheduleOutcome
    where
        F: FnMut(usize, usize),
    {
        let waves = plan_waves(units.len(), self.wave_size);
        let total = waves.len();
        let mut outcome = ScheduleOutcome {
            wave_sizes: waves.iter().map(|w| w.len()).collect(),
            ..Default::default()
        };

        info!(
            units = units.len(),
            wave_size = self.wave_size,
            waves = total,
            backend = %self.backend.id(),
            "Dispatching task units"
        );

        let mut pending = units.into_iter();
        for (k, range) in waves.iter().enumerate() {
            let wave = k + 1;
            if cancel.is_cancelled() {
                warn!(wave, total, "Cancelled before dispatch, remaining waves skipped");
                outcome.cancelled = true;
                break;
            }

            on_wave(wave, total);
            let batch: Vec<TaskUnit> = pending.by_ref().take(range.len()).collect();
            let started = Instant::now();

            let results = join_all(batch.into_iter().map(|unit| self.execute_unit(unit, wave))).await;

            let failed = results.iter().filter(|r| !r.is_success()).count();
            for result in results {
                if outcome.results.contains_key(&result.output_key) {
                    warn!(output_key = %result.output_key, "Duplicate output key, keeping latest");
                }
                outcome.results.insert(result.output_key.clone(), result);
            }
            outcome.waves_completed = wave;

            info!(
                wave,
                total,
                size = range.len(),
                failed,
                duration_ms = started.elapsed().as_millis() as u64,
                "Wave completed"
            );
        }

        outcome
    }

    /// Execute one unit; every failure becomes an error entry.
    async fn execute_unit(&self, unit: TaskUnit, wave: usize) -> TaskResult {
        let start = Instant::now();

        debug!(output_key = %unit.output_key, wave, "Invoking backend");

        let invocation = tokio::time::timeout(
            self.unit_timeout,
            self.backend.invoke(&unit.instruction, &unit.contract),
        )
        .await
        .unwrap_or_else(|_| {
            Err(InvocationError::Timeout(
                self.unit_timeout.as_millis() as u64,
            ))
        })
        .and_then(|value| {
            unit.contract.validate(&value)?;
            Ok(value)
        });

        let duration_ms = start.elapsed().as_millis() as u64;

        match invocation {
            Ok(value) => TaskResult::succeeded(&unit, value, wave, duration_ms),
            Err(e) => {
                warn!(output_key = %unit.output_key, wave, error = %e, "Task unit failed");
                TaskResult::failed(&unit, e.to_string(), wave, duration_ms)
            }
        }
    }
}
