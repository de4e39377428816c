//! OpenAI-compatible chat-completions provider (Cerebras endpoint by
//! default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::AgentError;
use crate::model::ActionPlan;
use crate::planner::prompt::{build_user_message, SYSTEM_PROMPT};
use crate::planner::{parse_action_plan, LlmProvider, PlanRequest};

pub const DEFAULT_API_BASE: &str = "https://api.cerebras.ai/v1";
pub const DEFAULT_MODEL: &str = "llama3.1-70b";

#[derive(Clone, Debug)]
pub struct CerebrasConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl CerebrasConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

pub struct CerebrasProvider {
    client: Client,
    config: CerebrasConfig,
}

impl CerebrasProvider {
    pub fn new(config: CerebrasConfig) -> Result<Self, AgentError> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::invalid_request("missing LLM API key"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                AgentError::invalid_request(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmProvider for CerebrasProvider {
    async fn decide(&self, request: &PlanRequest) -> Result<ActionPlan, AgentError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            // Determinism matters more than creativity here.
            temperature: 0.0,
            response_format: ResponseFormat {
                r#type: "json_object".to_string(),
            },
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_user_message(request),
                },
            ],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| AgentError::Llm(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            warn!(target: "planner", %status, "llm endpoint returned an error");
            return Err(AgentError::Llm(format!("endpoint returned {status}: {text}")));
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| AgentError::Llm(format!("invalid response body: {err}")))?;

        let content = payload
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| AgentError::Llm("response missing choices".to_string()))?;

        debug!(target: "planner", bytes = content.len(), "llm answered");
        parse_action_plan(&content)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        let err = CerebrasProvider::new(CerebrasConfig::new("  ")).unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[test]
    fn config_defaults() {
        let config = CerebrasConfig::new("key");
        assert_eq!(config.model, "llama3.1-70b");
        assert_eq!(config.api_base, "https://api.cerebras.ai/v1");
    }

    #[test]
    fn request_body_serializes_json_object_format() {
        let body = ChatCompletionRequest {
            model: "m".to_string(),
            temperature: 0.0,
            response_format: ResponseFormat {
                r#type: "json_object".to_string(),
            },
            messages: vec![],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"response_format\":{\"type\":\"json_object\"}"));
        assert!(json.contains("\"temperature\":0.0"));
    }
}
