//! CLI entry point: owned-browser mode.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agent_core::{
    AgentLoop, CerebrasConfig, CerebrasProvider, ContextPort, ExecutePort, Executor, FileEmitter,
    LoopConfig, NoPrompt, ObservePort, OverridePrompt, Planner,
};
use cdp_adapter::{CdpAdapter, CdpConfig, ContextManager};
use page_observer::Observer;

use crate::config::AppConfig;
use crate::prompt::StdinPrompt;

use super::env::CliArgs;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();
    init_logging();

    info!("flash-loop v{}", env!("CARGO_PKG_VERSION"));

    let app_config = AppConfig::from_env().context("configuration error")?;
    let provider = CerebrasProvider::new(
        CerebrasConfig::new(app_config.api_key)
            .with_model(app_config.model)
            .with_api_base(app_config.api_base),
    )
    .context("configuration error")?;

    let adapter = Arc::new(CdpAdapter::new(
        CdpConfig::default().with_headless(cli.headless),
    ));
    adapter.start().await.context("failed to start the browser")?;

    let start_url = cli.url.clone();
    let page = adapter
        .create_page(start_url.as_deref().unwrap_or("about:blank"))
        .await
        .context("failed to open the initial page")?;

    let context = ContextManager::start(Arc::clone(&adapter)).await;
    context.adopt_page(page).await;

    let observer: Arc<dyn ObservePort> = Arc::new(Observer::new(Arc::clone(&adapter)));
    let executor: Arc<dyn ExecutePort> =
        Arc::new(Executor::new(Arc::clone(&adapter), Arc::clone(&context)));
    let planner = Planner::new(Arc::new(provider));
    let prompt: Arc<dyn OverridePrompt> = if cli.interactive {
        Arc::new(StdinPrompt::new())
    } else {
        Arc::new(NoPrompt)
    };
    let emitter = Box::new(FileEmitter::new(
        std::env::current_dir().context("cannot resolve working directory")?,
    ));

    let loop_config = LoopConfig::new(&cli.goal)
        .with_max_steps(cli.max_steps)
        .with_interactive(cli.interactive)
        .with_start_url(start_url);

    let agent_loop = AgentLoop::new(
        loop_config,
        Arc::clone(&context) as Arc<dyn ContextPort>,
        observer,
        executor,
        planner,
        prompt,
        emitter,
    );

    let outcome = agent_loop.run().await;

    context.stop().await;
    adapter.shutdown().await;

    let outcome = outcome.context("agent loop failed")?;
    if outcome.success {
        info!(
            steps = outcome.steps,
            script = %outcome.output,
            "goal reached; script written"
        );
        Ok(())
    } else {
        error!(steps = outcome.steps, "goal was not reached");
        Err(anyhow!("goal was not reached after {} steps", outcome.steps))
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
