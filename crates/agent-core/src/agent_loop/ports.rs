//! Seams between the loop and the browser-facing components.
//!
//! The loop never touches the adapter directly; it drives these ports. The
//! real implementations live on the concrete components below, and tests
//! substitute mocks to run the loop without a browser.

use async_trait::async_trait;

use cdp_adapter::ContextManager;
use flashloop_core_types::PageId;
use page_observer::{Observation, Observer};

use crate::errors::AgentError;
use crate::executor::Executor;
use crate::model::{ActionPlan, ExecResult};

/// Read-only view of the browser context the loop needs each step.
#[async_trait]
pub trait ContextPort: Send + Sync {
    async fn active_page(&self) -> Option<PageId>;
    /// Banner describing the pending dialog, when one is blocking.
    async fn dialog_banner(&self) -> Option<String>;
    /// Liveness ping while the loop is parked on user input.
    async fn keepalive(&self);
}

#[async_trait]
impl ContextPort for ContextManager {
    async fn active_page(&self) -> Option<PageId> {
        ContextManager::active_page(self).await
    }

    async fn dialog_banner(&self) -> Option<String> {
        self.pending_dialog().await.map(|dialog| dialog.banner())
    }

    async fn keepalive(&self) {
        ContextManager::keepalive(self).await;
    }
}

#[async_trait]
pub trait ObservePort: Send + Sync {
    async fn observe(&self, page: PageId) -> Result<Observation, AgentError>;
}

#[async_trait]
impl ObservePort for Observer {
    async fn observe(&self, page: PageId) -> Result<Observation, AgentError> {
        Observer::observe(self, page)
            .await
            .map_err(|err| AgentError::Observation(err.to_string()))
    }
}

#[async_trait]
pub trait ExecutePort: Send + Sync {
    async fn execute(
        &self,
        page: PageId,
        plan: &ActionPlan,
        observation: &Observation,
    ) -> ExecResult;
}

#[async_trait]
impl ExecutePort for Executor {
    async fn execute(
        &self,
        page: PageId,
        plan: &ActionPlan,
        observation: &Observation,
    ) -> ExecResult {
        Executor::execute(self, page, plan, observation).await
    }
}

/// What the operator chose for a presented plan.
#[derive(Clone, Debug)]
pub enum OverrideChoice {
    Execute,
    /// Replace the plan with an operator-authored one.
    Override(ActionPlan),
    Skip,
    Quit,
}

/// Interactive review capability. Builds without any prompt machinery use
/// [`NoPrompt`].
#[async_trait]
pub trait OverridePrompt: Send + Sync {
    async fn review(&self, plan: &ActionPlan, state_text: &str) -> OverrideChoice;
}

/// Non-interactive default: every plan executes as-is.
pub struct NoPrompt;

#[async_trait]
impl OverridePrompt for NoPrompt {
    async fn review(&self, _plan: &ActionPlan, _state_text: &str) -> OverrideChoice {
        OverrideChoice::Execute
    }
}
