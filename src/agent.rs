//! In-process (hosted) entry point.
//!
//! A host that already owns a browser page can point the agent at it and
//! receive the generated script as a string. Under CI the call degrades to
//! an annotated no-op so unattended pipelines never spend LLM tokens.

use std::sync::Arc;

use anyhow::{Context, Result};

use agent_core::{
    AgentLoop, CerebrasConfig, CerebrasProvider, ContextPort, ExecutePort, Executor, LoopConfig,
    MemoryEmitter, NoPrompt, ObservePort, Planner,
};
use cdp_adapter::{CdpAdapter, ContextManager};
use flashloop_core_types::PageId;
use page_observer::Observer;

use crate::config::{ai_disabled_in_ci, AppConfig};

#[derive(Clone, Copy, Debug)]
pub struct AgentOptions {
    pub max_steps: u32,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self { max_steps: 20 }
    }
}

/// Drive `page` toward `goal` and return the generated script text.
pub async fn agent(
    adapter: Arc<CdpAdapter>,
    page: PageId,
    goal: &str,
    options: AgentOptions,
) -> Result<String> {
    if ai_disabled_in_ci() {
        return Ok(format!(
            "// flash-loop skipped: CI=true without ALLOW_AI_IN_CI (goal: {goal})\n"
        ));
    }

    let app_config = AppConfig::from_env().context("configuration error")?;
    let provider = CerebrasProvider::new(
        CerebrasConfig::new(app_config.api_key)
            .with_model(app_config.model)
            .with_api_base(app_config.api_base),
    )
    .context("configuration error")?;

    let context = ContextManager::start(Arc::clone(&adapter)).await;
    context.adopt_page(page).await;

    let observer: Arc<dyn ObservePort> = Arc::new(Observer::new(Arc::clone(&adapter)));
    let executor: Arc<dyn ExecutePort> =
        Arc::new(Executor::new(Arc::clone(&adapter), Arc::clone(&context)));

    let agent_loop = AgentLoop::new(
        LoopConfig::new(goal).with_max_steps(options.max_steps),
        Arc::clone(&context) as Arc<dyn ContextPort>,
        observer,
        executor,
        Planner::new(Arc::new(provider)),
        Arc::new(NoPrompt),
        Box::new(MemoryEmitter::new()),
    );

    let outcome = agent_loop.run().await;
    context.stop().await;
    let outcome = outcome.context("agent loop failed")?;
    Ok(outcome.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{CdpConfig, CdpTransport, ScriptedTransport};
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn ci_guard_short_circuits_without_touching_the_llm() {
        std::env::set_var("CI", "true");
        std::env::remove_var("ALLOW_AI_IN_CI");

        let transport = ScriptedTransport::new(|_, _, _| Ok(serde_json::json!({})));
        let adapter = Arc::new(CdpAdapter::with_transport(
            CdpConfig::default(),
            transport as Arc<dyn CdpTransport>,
        ));
        let page = PageId::new();

        let script = agent(adapter, page, "buy milk", AgentOptions::default())
            .await
            .unwrap();
        assert!(script.starts_with("// flash-loop skipped"));
        assert!(script.contains("buy milk"));

        std::env::remove_var("CI");
    }
}
