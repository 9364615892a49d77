//! OpenAI-compatible chat backend.
//!
//! Works with any OpenAI-compatible chat completions API including:
//! - vLLM
//! - Ollama
//! - OpenAI API
//! - LocalAI

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::traits::*;
use crate::config::BackendConfig;
use crate::contract::OutputContract;

/// Reasoning backend over an OpenAI-compatible chat completions endpoint.
pub struct ChatBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, InvocationError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| InvocationError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 512,
        })
    }

    /// Create a backend pointing to Ollama.
    pub fn ollama(model: &str) -> Result<Self, InvocationError> {
        Self::new("http://localhost:11434/v1", model, None)
    }

    /// Create a backend pointing to local vLLM server.
    pub fn vllm(port: u16, model: &str) -> Result<Self, InvocationError> {
        Self::new(format!("http://localhost:{}/v1", port), model, None)
    }

    /// Build from configuration, reading the API key from the configured variable.
    pub fn from_config(config: &BackendConfig) -> Result<Self, InvocationError> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());

        Ok(Self::new(&config.base_url, &config.model, api_key)?
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens))
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp.clamp(0.0, 2.0);
        self
    }

    /// Set max tokens.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }

    fn system_prompt(contract: &OutputContract) -> String {
        format!(
            "Respond with exactly one JSON object and nothing else. \
             The object must satisfy this JSON schema:\n{}",
            contract.json_schema()
        )
    }
}

/// OpenAI chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormatRequest,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormatRequest {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// OpenAI chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Parse model output as a JSON object, tolerating a markdown code fence.
fn parse_object(content: &str) -> Result<Value, InvocationError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| InvocationError::ParseError(e.to_string()))
}

#[async_trait]
impl ReasoningBackend for ChatBackend {
    fn id(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        instruction: &str,
        contract: &OutputContract,
    ) -> Result<Value, InvocationError> {
        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: Self::system_prompt(contract),
                },
                ChatMessage {
                    role: "user",
                    content: instruction.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormatRequest {
                format_type: "json_object",
            },
            stream: false,
        };

        let mut http_request = self.client.post(self.chat_completions_url());

        if let Some(auth) = self.auth_header() {
            http_request = http_request.header(header::AUTHORIZATION, auth);
        }

        let response = http_request
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| InvocationError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();

            if status.as_u16() == 429 {
                let retry_after_ms = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000);
                return Err(InvocationError::RateLimited { retry_after_ms });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(InvocationError::RequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| InvocationError::ParseError(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InvocationError::ParseError("No content in response".to_string()))?;

        debug!(model = %self.model, contract = %contract.name, "Chat completion received");

        parse_object(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_creation() {
        let backend = ChatBackend::ollama("llama3.2").unwrap();
        assert_eq!(backend.id(), "llama3.2");
        assert_eq!(
            backend.chat_completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let backend = ChatBackend::new("http://host:8000/v1/", "m", None).unwrap();
        assert_eq!(backend.chat_completions_url(), "http://host:8000/v1/chat/completions");
        assert!(backend.auth_header().is_none());
    }

    #[test]
    fn test_parse_object_variants() {
        assert_eq!(parse_object(r#"{"a": 1}"#).unwrap()["a"], 1);
        assert_eq!(parse_object("```json\n{\"a\": 2}\n```").unwrap()["a"], 2);
        assert_eq!(parse_object("```\n{\"a\": 3}\n```\n").unwrap()["a"], 3);
        assert!(matches!(
            parse_object("I think they would evacuate."),
            Err(InvocationError::ParseError(_))
        ));
    }

    #[test]
    fn test_system_prompt_embeds_schema() {
        let prompt = ChatBackend::system_prompt(&OutputContract::persona_reaction());
        assert!(prompt.contains("\"required\""));
        assert!(prompt.contains("PersonaReaction"));
    }
}
