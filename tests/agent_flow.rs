//! End-to-end loop test over a scripted transport: a fake login page is
//! observed, a deterministic planner fills the form and clicks through, and
//! the emitted script must replay exactly that path.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use agent_core::{
    ActionPlan, ActionType, AgentError, AgentLoop, ContextPort, ExecutePort, Executor,
    LlmProvider, LoopConfig, MemoryEmitter, NoPrompt, ObservePort, PlanRequest, Planner,
};
use cdp_adapter::{AdapterError, CdpAdapter, CdpConfig, CdpTransport, ContextManager, ScriptedTransport};
use flashloop_core_types::PageId;
use page_observer::Observer;

fn login_page_payload() -> String {
    let envelope = json!({
        "url": "https://example.com/login",
        "title": "Login | Example",
        "elements": [
            {
                "index": 0,
                "tag": "input",
                "testId": null,
                "role": "textbox",
                "inputType": "text",
                "placeholder": null,
                "name": null,
                "ariaLabel": null,
                "titleAttr": null,
                "alt": null,
                "text": "",
                "domId": "email",
                "xpath": "//*[@id=\"email\"]",
                "frameChain": [],
                "inViewport": true,
                "scrollable": false,
                "sensitive": false,
                "cx": 120.0,
                "cy": 80.0,
                "testIdCount": 0,
                "placeholderCount": 0,
                "textCount": 0
            },
            {
                "index": 1,
                "tag": "input",
                "testId": null,
                "role": "textbox",
                "inputType": "password",
                "placeholder": null,
                "name": null,
                "ariaLabel": null,
                "titleAttr": null,
                "alt": null,
                "text": "[REDACTED]",
                "domId": "pw",
                "xpath": "//*[@id=\"pw\"]",
                "frameChain": [],
                "inViewport": true,
                "scrollable": false,
                "sensitive": true,
                "cx": 120.0,
                "cy": 120.0,
                "testIdCount": 0,
                "placeholderCount": 0,
                "textCount": 0
            },
            {
                "index": 2,
                "tag": "button",
                "testId": null,
                "role": "button",
                "inputType": null,
                "placeholder": null,
                "name": null,
                "ariaLabel": null,
                "titleAttr": null,
                "alt": null,
                "text": "Login",
                "domId": null,
                "xpath": "/html/body[1]/form[1]/button[1]",
                "frameChain": [],
                "inViewport": true,
                "scrollable": false,
                "sensitive": false,
                "cx": 120.0,
                "cy": 160.0,
                "testIdCount": 0,
                "placeholderCount": 0,
                "textCount": 1
            }
        ]
    });
    serde_json::to_string(&envelope).unwrap()
}

fn login_page_handler(
    _target: &cdp_adapter::CommandTarget,
    method: &str,
    params: &Value,
) -> Result<Value, AdapterError> {
    if method != "Runtime.evaluate" {
        return Ok(json!({}));
    }
    let expression = params["expression"].as_str().unwrap_or_default();

    if expression.contains("__flashloop_nodes = []") {
        // The observer's extraction script.
        return Ok(json!({ "result": { "value": login_page_payload() } }));
    }
    if expression == "document.readyState" {
        return Ok(json!({ "result": { "value": "complete" } }));
    }
    if expression.contains("new Promise") {
        // The stability waiter resolves an object, not a string.
        return Ok(json!({ "result": { "value": { "achieved": true, "duration": 25 } } }));
    }
    // Selector verification and element primitives both answer with a
    // stringified status payload.
    Ok(json!({
        "result": {
            "value": json!({ "status": "ok", "count": 1, "cx": 120.0, "cy": 100.0 }).to_string()
        }
    }))
}

/// Deterministic "LLM": reads element ids out of the symbolic state like the
/// real planner is instructed to.
struct LoginPlanner;

fn id_for(state: &str, marker: &str) -> Option<String> {
    let line = state
        .lines()
        .find(|line| line.contains(marker) && line.contains("[ID: "))?;
    let start = line.find("[ID: ")? + 5;
    let end = line[start..].find(']')? + start;
    Some(line[start..end].to_string())
}

#[async_trait]
impl LlmProvider for LoginPlanner {
    async fn decide(&self, request: &PlanRequest) -> Result<ActionPlan, AgentError> {
        let state = &request.state_text;
        let plan = |action, target: Option<String>, value: Option<&str>| ActionPlan {
            thought: String::new(),
            plan: None,
            action_type: action,
            target_id: target,
            target_id2: None,
            value: value.map(str::to_string),
            is_finished: false,
        };

        match request.history.len() {
            0 => Ok(plan(
                ActionType::Fill,
                id_for(state, "\"email\""),
                Some("foo@bar.com"),
            )),
            1 => Ok(plan(
                ActionType::Fill,
                id_for(state, "type=password"),
                Some("pw"),
            )),
            2 => Ok(plan(ActionType::Click, id_for(state, "Login"), None)),
            _ => Ok(ActionPlan::finish()),
        }
    }
}

fn rigged_browser() -> (Arc<CdpAdapter>, PageId) {
    let transport = ScriptedTransport::new(login_page_handler);
    let adapter = Arc::new(CdpAdapter::with_transport(
        CdpConfig::default(),
        transport as Arc<dyn CdpTransport>,
    ));
    let page = PageId::new();
    adapter.registry().insert_page(page, "t-login".to_string());
    adapter.registry().set_cdp_session(&page, "s-login".to_string());
    (adapter, page)
}

#[tokio::test]
async fn login_flow_produces_a_replayable_script() {
    let (adapter, page) = rigged_browser();
    let context = ContextManager::start(Arc::clone(&adapter)).await;
    context.adopt_page(page).await;

    let agent_loop = AgentLoop::new(
        LoopConfig::new("log in as foo@bar.com / pw").with_max_steps(10),
        Arc::clone(&context) as Arc<dyn ContextPort>,
        Arc::new(Observer::new(Arc::clone(&adapter))) as Arc<dyn ObservePort>,
        Arc::new(Executor::new(Arc::clone(&adapter), Arc::clone(&context))) as Arc<dyn ExecutePort>,
        Planner::new(Arc::new(LoginPlanner)),
        Arc::new(NoPrompt),
        Box::new(MemoryEmitter::new()),
    );

    let outcome = agent_loop.run().await.unwrap();
    context.stop().await;

    assert!(outcome.success, "history: {:?}", outcome.history);
    assert_eq!(outcome.history.len(), 3);
    assert!(outcome.history.iter().all(|entry| entry.starts_with("SUCCESS:")));

    let script = outcome.output;
    let email_fill =
        "await page.getByRole('textbox', { name: 'email', exact: true }).fill('foo@bar.com');";
    let password_fill =
        "await page.getByRole('textbox', { name: 'pw', exact: true }).fill('pw');";
    let login_click =
        "await page.getByRole('button', { name: 'Login', exact: true }).click();";

    assert!(script.contains(email_fill), "script:\n{script}");
    assert!(script.contains(password_fill), "script:\n{script}");
    assert!(script.contains(login_click), "script:\n{script}");

    // Statements appear in execution order.
    let email_at = script.find(email_fill).unwrap();
    let password_at = script.find(password_fill).unwrap();
    let click_at = script.find(login_click).unwrap();
    assert!(email_at < password_at && password_at < click_at);

    // The artifact is a syntactically plausible test file.
    assert!(script.starts_with("// Generated by flash-loop"));
    assert!(script.contains("import { test, expect } from '@playwright/test';"));
    assert!(script.trim_end().ends_with("});"));
    assert_eq!(script.matches('{').count(), script.matches('}').count());
}

#[tokio::test]
async fn password_state_is_redacted_but_script_keeps_the_value() {
    let (adapter, page) = rigged_browser();
    let observer = Observer::new(Arc::clone(&adapter));

    let observation = observer.observe(page).await.unwrap();
    assert!(observation.state_text.contains("[REDACTED]"));
    assert!(!observation.state_text.contains("hunter2"));

    // The catalog still lets the planner target the field.
    assert!(id_for(&observation.state_text, "type=password").is_some());
}

#[tokio::test]
async fn unknown_target_id_stops_a_non_interactive_run() {
    let (adapter, page) = rigged_browser();
    let context = ContextManager::start(Arc::clone(&adapter)).await;
    context.adopt_page(page).await;

    struct BadTargetPlanner;

    #[async_trait]
    impl LlmProvider for BadTargetPlanner {
        async fn decide(&self, _request: &PlanRequest) -> Result<ActionPlan, AgentError> {
            Ok(ActionPlan {
                thought: String::new(),
                plan: None,
                action_type: ActionType::Click,
                target_id: Some("btn-xxxx-1".to_string()),
                target_id2: None,
                value: None,
                is_finished: false,
            })
        }
    }

    let agent_loop = AgentLoop::new(
        LoopConfig::new("click the ghost button").with_max_steps(10),
        Arc::clone(&context) as Arc<dyn ContextPort>,
        Arc::new(Observer::new(Arc::clone(&adapter))) as Arc<dyn ObservePort>,
        Arc::new(Executor::new(Arc::clone(&adapter), Arc::clone(&context))) as Arc<dyn ExecutePort>,
        Planner::new(Arc::new(BadTargetPlanner)),
        Arc::new(NoPrompt),
        Box::new(MemoryEmitter::new()),
    );

    let outcome = agent_loop.run().await.unwrap();
    context.stop().await;

    assert!(!outcome.success);
    assert_eq!(outcome.steps, 1, "fatal input must stop the loop");
    assert!(outcome.history[0].starts_with("ERROR: click on btn-xxxx-1 failed."));
    assert!(!outcome.output.contains(".click();"), "no code for the failed step");
}
