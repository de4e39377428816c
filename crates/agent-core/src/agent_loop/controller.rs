//! Loop controller: sequences observation, planning, review and execution
//! until the goal is reached, the step cap is hit, or a fatal error stops
//! the run.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use double_check::escape_literal;

use crate::agent_loop::ports::{
    ContextPort, ExecutePort, ObservePort, OverrideChoice, OverridePrompt,
};
use crate::emitter::ScriptEmitter;
use crate::errors::AgentError;
use crate::history::HistoryLog;
use crate::model::{ActionPlan, ActionType};
use crate::planner::{PlanRequest, Planner};

const PROMPT_HISTORY_WINDOW: usize = 5;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub goal: String,
    pub max_steps: u32,
    pub interactive: bool,
    /// When set, a `page.goto` preamble is recorded so the script replays
    /// from the same origin the run started at.
    pub start_url: Option<String>,
}

impl LoopConfig {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            max_steps: 20,
            interactive: false,
            start_url: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_start_url(mut self, url: Option<String>) -> Self {
        self.start_url = url;
        self
    }
}

/// Final state of a loop run.
#[derive(Debug)]
pub struct LoopOutcome {
    pub success: bool,
    pub steps: u32,
    /// The emitter's artifact: script text or file path.
    pub output: String,
    pub history: Vec<String>,
}

pub struct AgentLoop {
    config: LoopConfig,
    context: Arc<dyn ContextPort>,
    observer: Arc<dyn ObservePort>,
    executor: Arc<dyn ExecutePort>,
    planner: Planner,
    prompt: Arc<dyn OverridePrompt>,
    emitter: Box<dyn ScriptEmitter>,
    history: HistoryLog,
}

impl AgentLoop {
    pub fn new(
        config: LoopConfig,
        context: Arc<dyn ContextPort>,
        observer: Arc<dyn ObservePort>,
        executor: Arc<dyn ExecutePort>,
        planner: Planner,
        prompt: Arc<dyn OverridePrompt>,
        emitter: Box<dyn ScriptEmitter>,
    ) -> Self {
        Self {
            config,
            context,
            observer,
            executor,
            planner,
            prompt,
            emitter,
            history: HistoryLog::new(),
        }
    }

    /// Drive the loop to completion and return the emitted artifact.
    pub async fn run(mut self) -> Result<LoopOutcome, AgentError> {
        self.emitter.init(&self.config.goal)?;
        if let Some(url) = self.config.start_url.clone() {
            self.emitter.append_code(
                &format!("await page.goto('{}');", escape_literal(&url)),
                Some("open the start page"),
            )?;
        }

        let mut success = false;
        let mut steps = 0u32;
        let mut last_error: Option<String> = None;

        while steps < self.config.max_steps {
            steps += 1;
            let Some(page) = self.context.active_page().await else {
                error!(target: "loop", "no pages remain; stopping");
                break;
            };
            info!(target: "loop", step = steps, max = self.config.max_steps, "step start");

            // Observe.
            let observation = match self.observer.observe(page).await {
                Ok(observation) => observation,
                Err(err) if err.is_recoverable() => {
                    let guidance = err.planner_guidance();
                    warn!(target: "loop", %guidance, "observation failed");
                    self.history
                        .add(format!("ERROR: observe failed. {guidance}"));
                    last_error = Some(guidance);
                    continue;
                }
                Err(err) => return Err(err),
            };

            // A pending dialog outranks everything else in the state.
            let mut state_text = observation.state_text.clone();
            if let Some(banner) = self.context.dialog_banner().await {
                state_text = format!("{banner}\n\n{state_text}");
            }

            // Think.
            let request = PlanRequest {
                goal: self.config.goal.clone(),
                state_text,
                history: self.history.recent(PROMPT_HISTORY_WINDOW),
                last_error: last_error.clone(),
            };
            let mut plan = match self.planner.plan(&request).await {
                Ok(plan) => plan,
                Err(err) if err.is_recoverable() => {
                    let guidance = err.planner_guidance();
                    warn!(target: "loop", %guidance, "planning failed");
                    self.history.add(format!("ERROR: plan failed. {guidance}"));
                    last_error = Some(guidance);
                    continue;
                }
                Err(err) => return Err(err),
            };

            if plan.is_finished && !self.config.interactive {
                info!(target: "loop", thought = %plan.thought, "goal reached");
                success = true;
                break;
            }

            // Interactive review, with a keepalive so the browser session
            // survives a long think.
            if self.config.interactive {
                match self.review_with_keepalive(&plan, &observation.state_text).await {
                    OverrideChoice::Execute => {}
                    OverrideChoice::Override(replacement) => plan = replacement,
                    OverrideChoice::Skip => {
                        self.history
                            .add(format!("SKIPPED: {}", plan.label()));
                        continue;
                    }
                    OverrideChoice::Quit => break,
                }
                if plan.is_finished || plan.action_type == ActionType::Finish {
                    success = true;
                    break;
                }
            }

            // Act.
            let result = self.executor.execute(page, &plan, &observation).await;
            let label = plan.label();
            if result.success {
                self.history.add(format!("SUCCESS: {label}"));
                if let Some(code) = &result.generated_code {
                    self.emitter.append_code(code, Some(&plan.thought))?;
                }
                last_error = None;
                if plan.action_type == ActionType::Finish {
                    success = true;
                    break;
                }
            } else {
                let guidance = result
                    .user_guidance
                    .or(result.error)
                    .unwrap_or_else(|| "unknown failure".to_string());
                warn!(target: "loop", %guidance, "action failed");
                self.history
                    .add(format!("ERROR: {label} failed. {guidance}"));
                last_error = Some(guidance);
                if !result.retryable && !self.config.interactive {
                    error!(target: "loop", "fatal planner input; stopping");
                    break;
                }
            }
        }

        self.emitter.finish()?;
        info!(target: "loop", success, steps, "loop finished");
        Ok(LoopOutcome {
            success,
            steps,
            output: self.emitter.output(),
            history: self.history.entries(),
        })
    }

    async fn review_with_keepalive(
        &self,
        plan: &ActionPlan,
        state_text: &str,
    ) -> OverrideChoice {
        let context = Arc::clone(&self.context);
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await; // immediate first tick is a no-op
            loop {
                ticker.tick().await;
                context.keepalive().await;
            }
        });
        let choice = self.prompt.review(plan, state_text).await;
        keepalive.abort();
        choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::ports::NoPrompt;
    use crate::emitter::MemoryEmitter;
    use crate::model::ExecResult;
    use crate::planner::{LlmProvider, MockProvider};
    use async_trait::async_trait;
    use flashloop_core_types::PageId;
    use page_observer::Observation;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FixedContext {
        page: PageId,
        banner: Option<String>,
    }

    #[async_trait]
    impl ContextPort for FixedContext {
        async fn active_page(&self) -> Option<PageId> {
            Some(self.page)
        }
        async fn dialog_banner(&self) -> Option<String> {
            self.banner.clone()
        }
        async fn keepalive(&self) {}
    }

    struct FixedObserver {
        observation: Observation,
    }

    #[async_trait]
    impl ObservePort for FixedObserver {
        async fn observe(&self, _page: PageId) -> Result<Observation, AgentError> {
            Ok(self.observation.clone())
        }
    }

    struct ScriptedExecutor {
        results: Mutex<Vec<ExecResult>>,
        calls: AtomicU32,
    }

    impl ScriptedExecutor {
        fn new(mut results: Vec<ExecResult>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ExecutePort for ScriptedExecutor {
        async fn execute(
            &self,
            _page: PageId,
            _plan: &ActionPlan,
            _observation: &Observation,
        ) -> ExecResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(ExecResult::ok)
        }
    }

    fn plan(action: ActionType, target: Option<&str>) -> ActionPlan {
        ActionPlan {
            thought: format!("do {}", action.as_str()),
            plan: None,
            action_type: action,
            target_id: target.map(str::to_string),
            target_id2: None,
            value: None,
            is_finished: false,
        }
    }

    fn loop_under_test(
        plans: Vec<ActionPlan>,
        results: Vec<ExecResult>,
        banner: Option<String>,
        max_steps: u32,
    ) -> (AgentLoop, Arc<ScriptedExecutor>) {
        let executor = Arc::new(ScriptedExecutor::new(results));
        let agent_loop = AgentLoop::new(
            LoopConfig::new("test the page").with_max_steps(max_steps),
            Arc::new(FixedContext {
                page: PageId::new(),
                banner,
            }),
            Arc::new(FixedObserver {
                observation: Observation {
                    url: "https://example.com".to_string(),
                    title: "Example".to_string(),
                    state_text: "URL: https://example.com\nTitle: Example\n".to_string(),
                    ..Default::default()
                },
            }),
            executor.clone(),
            Planner::new(Arc::new(MockProvider::scripted(plans))),
            Arc::new(NoPrompt),
            Box::new(MemoryEmitter::new()),
        );
        (agent_loop, executor)
    }

    #[tokio::test]
    async fn successful_run_emits_code_and_finishes() {
        let click = plan(ActionType::Reload, None);
        let (agent_loop, executor) = loop_under_test(
            vec![click, ActionPlan::finish()],
            vec![ExecResult::ok_with_code("await page.reload();")],
            None,
            20,
        );

        let outcome = agent_loop.run().await.unwrap();
        assert!(outcome.success);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(outcome.output.contains("await page.reload();"));
        assert!(outcome.output.trim_end().ends_with("});"));
        assert_eq!(outcome.history.len(), 1);
        assert!(outcome.history[0].starts_with("SUCCESS: reload"));
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_loop_without_code() {
        let bad = plan(ActionType::Click, Some("button-dead-1"));
        let (agent_loop, executor) = loop_under_test(
            vec![bad, ActionPlan::finish()],
            vec![ExecResult::fail(
                "Unknown: Target ID 'button-dead-1' not found in memory.",
                "Unknown: Target ID 'button-dead-1' not found in memory.",
                false,
            )],
            None,
            20,
        );

        let outcome = agent_loop.run().await.unwrap();
        assert!(!outcome.success);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.output.contains("click"));
        assert!(outcome.history[0].starts_with("ERROR: click"));
    }

    #[tokio::test]
    async fn retryable_failure_feeds_error_back_and_continues() {
        let first = plan(ActionType::Click, Some("button-1"));
        let (agent_loop, executor) = loop_under_test(
            vec![first, ActionPlan::finish()],
            vec![ExecResult::fail(
                "Timeout: the action did not complete in time",
                "Timeout: the action did not complete in time",
                true,
            )],
            None,
            20,
        );

        let outcome = agent_loop.run().await.unwrap();
        assert!(outcome.success, "loop should continue to the finish plan");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(outcome.history[0].contains("Timeout"));
    }

    #[tokio::test]
    async fn max_steps_is_strictly_honored() {
        let endless: Vec<ActionPlan> = (0..50)
            .map(|_| plan(ActionType::Reload, None))
            .collect();
        let (agent_loop, executor) = loop_under_test(endless, vec![], None, 3);

        let outcome = agent_loop.run().await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.steps, 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn start_url_preamble_is_recorded() {
        let (mut agent_loop, _executor) =
            loop_under_test(vec![ActionPlan::finish()], vec![], None, 20);
        agent_loop.config.start_url = Some("https://example.com/login".to_string());

        let outcome = agent_loop.run().await.unwrap();
        assert!(outcome
            .output
            .contains("await page.goto('https://example.com/login');"));
    }

    #[tokio::test]
    async fn dialog_banner_reaches_the_planner() {
        struct BannerSniffer {
            saw_banner: std::sync::Arc<std::sync::atomic::AtomicBool>,
        }

        #[async_trait]
        impl LlmProvider for BannerSniffer {
            async fn decide(&self, request: &PlanRequest) -> Result<ActionPlan, AgentError> {
                if request.state_text.starts_with("⚠️ [Alert Dialog]") {
                    self.saw_banner.store(true, Ordering::SeqCst);
                }
                Ok(ActionPlan::finish())
            }
        }

        let saw_banner = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let agent_loop = AgentLoop::new(
            LoopConfig::new("g"),
            Arc::new(FixedContext {
                page: PageId::new(),
                banner: Some(
                    "⚠️ [Alert Dialog] Type: confirm, Message: Sure?".to_string(),
                ),
            }),
            Arc::new(FixedObserver {
                observation: Observation::default(),
            }),
            Arc::new(ScriptedExecutor::new(vec![])),
            Planner::new(Arc::new(BannerSniffer {
                saw_banner: saw_banner.clone(),
            })),
            Arc::new(NoPrompt),
            Box::new(MemoryEmitter::new()),
        );

        let outcome = agent_loop.run().await.unwrap();
        assert!(outcome.success);
        assert!(saw_banner.load(Ordering::SeqCst));
    }
}
