//! The five-step session flow.
//!
//! Session creation must reach the service; every later step is attempted
//! regardless of earlier failures and recorded in order. Only transport
//! errors and timeouts are failures. An HTTP error status is recorded with
//! its body and the flow moves on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::client::{StepError, StepRequest, StepResponse, TargetService};
use crate::session::{extract_session_id, DEFAULT_SESSION_ID};

/// Rate-shaping pause after session creation. Steps are already awaited one
/// after another; nothing may rely on this pause for ordering.
pub const PAUSE_AFTER_CREATE: Duration = Duration::from_millis(100);
/// Rate-shaping pause after each listing step. Not an ordering guarantee.
pub const PAUSE_AFTER_LISTING: Duration = Duration::from_millis(80);
/// Default per-step deadline.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_APP_NAME: &str = "multi-persona-agent";
pub const DEFAULT_USER_ID: &str = "user";

/// The message submitted when the caller does not provide one.
pub fn default_new_message() -> Value {
    json!({
        "parts": [{ "text": "Hello from simulate_flow" }],
        "role": "user"
    })
}

/// Caller overrides for a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRequest {
    pub app_name: String,
    pub user_id: String,
    /// Message body for the run step; `None` uses the default greeting
    pub new_message: Option<Value>,
    pub streaming: bool,
}

impl Default for FlowRequest {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            new_message: None,
            streaming: false,
        }
    }
}

/// Steps of the flow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    CreateSession,
    ListEvalSets,
    ListEvalResults,
    ListSessions,
    SubmitRun,
}

/// Whether a step got a response at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
}

/// One attempted step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStepRecord {
    pub step: FlowStep,
    pub request: StepRequest,
    pub status: StepStatus,
    /// HTTP status of the response, error statuses included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl FlowStepRecord {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Overall flow outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Ok,
    PartialFailure,
}

/// Ordered step log plus overall status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub status: FlowStatus,
    /// Session id used for the run step; absent when the flow aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Session creation got no response and nothing else was attempted
    pub aborted: bool,
    pub steps: Vec<FlowStepRecord>,
}

impl FlowReport {
    /// Record for a step, if it was attempted.
    pub fn step(&self, step: FlowStep) -> Option<&FlowStepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|r| !r.is_success()).count()
    }
}

/// Drives the flow against one target service.
pub struct FlowSimulator {
    service: Arc<dyn TargetService>,
    step_timeout: Duration,
}

impl FlowSimulator {
    pub fn new(service: Arc<dyn TargetService>) -> Self {
        Self {
            service,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Set the per-step deadline.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Run the flow. Never fails; failures are in the report.
    pub async fn run(&self, request: &FlowRequest) -> FlowReport {
        let app = request.app_name.as_str();
        let user = request.user_id.as_str();
        let mut steps = Vec::with_capacity(5);

        let created = self
            .attempt(FlowStep::CreateSession, StepRequest::create_session(app, user))
            .await;
        let create_response = created.response.clone();
        let create_failed = !created.is_success();
        steps.push(created);

        if create_failed {
            error!(app, user, "Session creation got no response, flow aborted");
            return FlowReport {
                status: FlowStatus::PartialFailure,
                session_id: None,
                aborted: true,
                steps,
            };
        }

        let session_id = create_response
            .as_ref()
            .and_then(extract_session_id)
            .unwrap_or_else(|| {
                warn!("No session id in create-session response, using default");
                DEFAULT_SESSION_ID.to_string()
            });
        tokio::time::sleep(PAUSE_AFTER_CREATE).await;

        let listings = [
            (FlowStep::ListEvalSets, StepRequest::list_eval_sets(app)),
            (FlowStep::ListEvalResults, StepRequest::list_eval_results(app)),
            (FlowStep::ListSessions, StepRequest::list_sessions(app, user)),
        ];
        for (step, step_request) in listings {
            steps.push(self.attempt(step, step_request).await);
            tokio::time::sleep(PAUSE_AFTER_LISTING).await;
        }

        let new_message = request.new_message.clone().unwrap_or_else(default_new_message);
        let run = StepRequest::submit_run(app, user, &session_id, &new_message, request.streaming);
        steps.push(self.attempt(FlowStep::SubmitRun, run).await);

        let status = if steps.iter().all(FlowStepRecord::is_success) {
            FlowStatus::Ok
        } else {
            FlowStatus::PartialFailure
        };

        info!(app, user, session_id = %session_id, ?status, "Flow finished");

        FlowReport {
            status,
            session_id: Some(session_id),
            aborted: false,
            steps,
        }
    }

    async fn attempt(&self, step: FlowStep, request: StepRequest) -> FlowStepRecord {
        let start = Instant::now();

        let outcome = tokio::time::timeout(self.step_timeout, self.service.send(&request))
            .await
            .unwrap_or_else(|_| Err(StepError::Timeout(self.step_timeout.as_millis() as u64)));

        let duration_ms = start.elapsed().as_millis() as u64;
        let (status, http_status, response, error) = match outcome {
            Ok(StepResponse { status, body }) => {
                info!(step = %request, http_status = status, duration_ms, "Step OK");
                (StepStatus::Success, Some(status), Some(body), None)
            }
            Err(e) => {
                warn!(step = %request, duration_ms, error = %e, "Step failed");
                (StepStatus::Error, None, None, Some(e.to_string()))
            }
        };

        FlowStepRecord {
            step,
            request,
            status,
            http_status,
            response,
            error,
            duration_ms,
            recorded_at: Utc::now(),
        }
    }
}
