//! Target service seam and its HTTP implementation.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a single step failed. An HTTP error status is a response, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// Connection or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response within the step deadline
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// Any HTTP response, whatever its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: u16,
    pub body: Value,
}

impl StepResponse {
    /// 200 with `body`.
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success_status(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP verb of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepMethod {
    Get,
    Post,
}

impl fmt::Display for StepMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// One call of the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub method: StepMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl StepRequest {
    /// `POST /apps/{app}/users/{user}/sessions` with an empty object.
    pub fn create_session(app: &str, user: &str) -> Self {
        Self {
            method: StepMethod::Post,
            path: format!("/apps/{}/users/{}/sessions", app, user),
            body: Some(json!({})),
        }
    }

    /// `GET /apps/{app}/eval_sets`
    pub fn list_eval_sets(app: &str) -> Self {
        Self::get(format!("/apps/{}/eval_sets", app))
    }

    /// `GET /apps/{app}/eval_results`
    pub fn list_eval_results(app: &str) -> Self {
        Self::get(format!("/apps/{}/eval_results", app))
    }

    /// `GET /apps/{app}/users/{user}/sessions`
    pub fn list_sessions(app: &str, user: &str) -> Self {
        Self::get(format!("/apps/{}/users/{}/sessions", app, user))
    }

    /// `POST /run_sse` with the run payload.
    pub fn submit_run(
        app: &str,
        user: &str,
        session_id: &str,
        new_message: &Value,
        streaming: bool,
    ) -> Self {
        Self {
            method: StepMethod::Post,
            path: "/run_sse".to_string(),
            body: Some(json!({
                "appName": app,
                "userId": user,
                "sessionId": session_id,
                "newMessage": new_message,
                "streaming": streaming,
            })),
        }
    }

    fn get(path: String) -> Self {
        Self {
            method: StepMethod::Get,
            path,
            body: None,
        }
    }
}

impl fmt::Display for StepRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The service a flow is driven against.
#[async_trait]
pub trait TargetService: Send + Sync {
    /// Perform one request and return its status and decoded body.
    async fn send(&self, request: &StepRequest) -> Result<StepResponse, StepError>;
}

/// Target service over HTTP.
pub struct HttpTargetService {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTargetService {
    /// Client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StepError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StepError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Decode a body as JSON, wrapping anything else as `{"text": raw}`.
pub fn decode_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "text": raw }))
}

#[async_trait]
impl TargetService for HttpTargetService {
    async fn send(&self, request: &StepRequest) -> Result<StepResponse, StepError> {
        let method = match request.method {
            StepMethod::Get => Method::GET,
            StepMethod::Post => Method::POST,
        };
        let url = format!("{}{}", self.base_url, request.path);

        let mut http_request = self.client.request(method, &url);
        if let Some(body) = &request.body {
            http_request = http_request.json(body);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                StepError::Timeout(self.timeout.as_millis() as u64)
            } else {
                StepError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| StepError::Transport(e.to_string()))?;

        if status.is_success() {
            debug!(step = %request, status = status.as_u16(), "Target responded");
        } else {
            warn!(step = %request, status = status.as_u16(), "Target responded with error status");
        }

        Ok(StepResponse {
            status: status.as_u16(),
            body: decode_body(&raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_paths() {
        assert_eq!(
            StepRequest::create_session("multi-persona-agent", "user").to_string(),
            "POST /apps/multi-persona-agent/users/user/sessions"
        );
        assert_eq!(StepRequest::list_eval_sets("a").path, "/apps/a/eval_sets");
        assert_eq!(StepRequest::list_eval_results("a").path, "/apps/a/eval_results");
        assert_eq!(
            StepRequest::list_sessions("a", "u").to_string(),
            "GET /apps/a/users/u/sessions"
        );
        assert!(StepRequest::list_sessions("a", "u").body.is_none());
    }

    #[test]
    fn test_submit_run_payload() {
        let message = json!({ "parts": [{ "text": "hi" }], "role": "user" });
        let request = StepRequest::submit_run("app", "u1", "sess-42", &message, true);
        let body = request.body.unwrap();

        assert_eq!(request.path, "/run_sse");
        assert_eq!(body["appName"], "app");
        assert_eq!(body["userId"], "u1");
        assert_eq!(body["sessionId"], "sess-42");
        assert_eq!(body["newMessage"], message);
        assert_eq!(body["streaming"], true);
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(r#"{"ok": true}"#)["ok"], true);
        assert_eq!(decode_body("data: hello")["text"], "data: hello");
    }

    #[test]
    fn test_response_status_range() {
        assert!(StepResponse::ok(json!({})).is_success_status());
        let not_found = StepResponse {
            status: 404,
            body: decode_body(r#"{"detail": "Not Found"}"#),
        };
        assert!(!not_found.is_success_status());
        assert_eq!(not_found.body["detail"], "Not Found");
    }
}
