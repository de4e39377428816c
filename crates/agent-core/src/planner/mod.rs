//! Planner: the bridge to the LLM.
//!
//! Providers are pluggable behind [`LlmProvider`]; the planner itself is
//! stateless between calls; everything the model needs travels in the
//! request.

pub mod cerebras;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::AgentError;
use crate::model::ActionPlan;
use crate::plan_validator::normalize_plan;

pub use cerebras::{CerebrasConfig, CerebrasProvider};

/// Everything one planning call needs.
#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub goal: String,
    /// Symbolic state, possibly prefixed with a pending-dialog banner.
    pub state_text: String,
    /// Recent history entries, oldest first.
    pub history: Vec<String>,
    /// Translated error from the previous step, if it failed.
    pub last_error: Option<String>,
}

/// Abstraction over LLM vendors.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Decide the next action for the current state.
    async fn decide(&self, request: &PlanRequest) -> Result<ActionPlan, AgentError>;
}

/// Stateless front door: calls the provider and normalizes the result.
pub struct Planner {
    provider: Arc<dyn LlmProvider>,
}

impl Planner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub async fn plan(&self, request: &PlanRequest) -> Result<ActionPlan, AgentError> {
        let mut plan = self.provider.decide(request).await?;
        normalize_plan(&mut plan);
        debug!(
            target: "planner",
            action = plan.action_type.as_str(),
            target = plan.target_id.as_deref().unwrap_or("-"),
            "plan received"
        );
        Ok(plan)
    }
}

/// Extract the first balanced JSON object from free-form model output.
/// Models wrap JSON in prose or fences often enough that this is load-bearing.
pub fn extract_json_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode model output into an action plan, surfacing schema problems as
/// retryable guidance.
pub fn parse_action_plan(content: &str) -> Result<ActionPlan, AgentError> {
    let json = extract_json_object(content)
        .ok_or_else(|| AgentError::Schema("no JSON object in model output".to_string()))?;
    serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))
}

/// Deterministic provider replaying scripted plans; used by tests and
/// offline development.
#[derive(Default)]
pub struct MockProvider {
    plans: Mutex<Vec<ActionPlan>>,
}

impl MockProvider {
    /// Plans are handed out in the given order; once exhausted, `finish`.
    pub fn scripted(plans: Vec<ActionPlan>) -> Self {
        let mut reversed = plans;
        reversed.reverse();
        Self {
            plans: Mutex::new(reversed),
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn decide(&self, request: &PlanRequest) -> Result<ActionPlan, AgentError> {
        if request.goal.trim().is_empty() {
            return Err(AgentError::invalid_request("goal cannot be empty"));
        }
        let mut plans = self.plans.lock().await;
        Ok(plans.pop().unwrap_or_else(ActionPlan::finish))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionType;

    #[test]
    fn extracts_json_from_prose_and_fences() {
        let content = "Sure! Here is the plan:\n```json\n{\"actionType\": \"reload\"}\n``` done";
        let json = extract_json_object(content).unwrap();
        assert_eq!(json, "{\"actionType\": \"reload\"}");
    }

    #[test]
    fn extracts_nested_objects_and_braces_in_strings() {
        let content = r#"{"thought": "click the { weird } one", "actionType": "finish", "plan": {"currentStatus": "done"}}"#;
        let json = extract_json_object(content).unwrap();
        let plan: ActionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan.action_type, ActionType::Finish);
    }

    #[test]
    fn parse_failure_is_schema_error() {
        let err = parse_action_plan("the page looks fine to me").unwrap_err();
        assert!(matches!(err, AgentError::Schema(_)));
        assert_eq!(
            err.planner_guidance(),
            "Return a single JSON object matching the action schema."
        );
    }

    #[tokio::test]
    async fn mock_provider_replays_then_finishes() {
        let provider = MockProvider::scripted(vec![ActionPlan {
            action_type: ActionType::Reload,
            ..ActionPlan::finish()
        }]);
        let request = PlanRequest {
            goal: "g".to_string(),
            state_text: String::new(),
            history: vec![],
            last_error: None,
        };
        let first = provider.decide(&request).await.unwrap();
        assert_eq!(first.action_type, ActionType::Reload);
        let second = provider.decide(&request).await.unwrap();
        assert_eq!(second.action_type, ActionType::Finish);
    }
}
