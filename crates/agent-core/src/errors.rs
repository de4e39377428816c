//! Agent-level error model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The LLM call itself failed (transport, auth, quota).
    #[error("llm request failed: {0}")]
    Llm(String),
    /// The LLM answered but the answer does not match the action schema.
    #[error("llm output did not match the action schema: {0}")]
    Schema(String),
    #[error("observation failed: {0}")]
    Observation(String),
    /// A failure of the loop machinery itself, not of the page or the plan.
    #[error("system error: {0}")]
    System(String),
}

impl AgentError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Errors worth feeding back into the next plan rather than aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::Llm(_) | AgentError::Schema(_) | AgentError::Observation(_)
        )
    }

    /// Guidance string suitable as planner feedback.
    pub fn planner_guidance(&self) -> String {
        match self {
            AgentError::Schema(_) => {
                "Return a single JSON object matching the action schema.".to_string()
            }
            other => other.to_string(),
        }
    }
}
