//! Action execution.
//!
//! Dispatches a validated plan into its band (meta, context, navigation,
//! element), resolves element targets through the double-check synthesizer,
//! performs the primitive, waits for the page to restabilize and reports the
//! matching script fragment. Failures come back translated and classified
//! for retryability; the loop decides what to do with them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use cdp_adapter::{CdpAdapter, ContextManager, TabSelector};
use double_check::{escape_literal, PickSlot, SelectorSynthesizer, VerifiedSelector};
use flashloop_core_types::PageId;
use page_observer::{ElementDescriptor, Observation, StabilityWaiter};

use crate::model::{ActionPlan, ActionType, ExecResult};
use crate::plan_validator::validate_plan;
use crate::translate::translate_error;

const WAIT_FOR_ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);
const POST_ACTION_DOM_TIMEOUT: Duration = Duration::from_secs(2);
const POST_ACTION_NETWORK_QUIET: Duration = Duration::from_millis(500);
const POST_ACTION_NETWORK_TIMEOUT: Duration = Duration::from_secs(1);

/// Messages that indicate planner malfunction rather than page flakiness;
/// retrying the loop with more context will not fix them.
const FATAL_MARKERS: &[&str] = &[
    "requires a target",
    "requires targetId",
    "requires a URL",
    "Unsupported action",
    "not found in memory",
    "not found",
    "Target ID is missing",
];

pub fn is_fatal_message(message: &str) -> bool {
    FATAL_MARKERS.iter().any(|marker| message.contains(marker))
}

pub struct Executor {
    adapter: Arc<CdpAdapter>,
    context: Arc<ContextManager>,
    synthesizer: SelectorSynthesizer,
    stability: StabilityWaiter,
}

impl Executor {
    pub fn new(adapter: Arc<CdpAdapter>, context: Arc<ContextManager>) -> Self {
        let synthesizer = SelectorSynthesizer::new(Arc::clone(&adapter));
        Self {
            adapter,
            context,
            synthesizer,
            stability: StabilityWaiter::default(),
        }
    }

    /// Execute one plan against the current observation's catalog.
    pub async fn execute(
        &self,
        page: PageId,
        plan: &ActionPlan,
        observation: &Observation,
    ) -> ExecResult {
        if let Err(message) = validate_plan(plan) {
            return failure(&message);
        }

        let outcome = match plan.action_type {
            ActionType::Finish => Ok(None),
            ActionType::SwitchTab | ActionType::CloseTab | ActionType::HandleDialog => {
                self.run_context_band(plan).await
            }
            ActionType::Navigate | ActionType::Reload | ActionType::GoBack => {
                self.run_navigation_band(page, plan).await
            }
            ActionType::Scroll => self.run_scroll(page, plan, observation).await,
            ActionType::AssertUrl => {
                let expected = plan.value.as_deref().unwrap_or_default();
                match self.assert_url(page, expected).await {
                    Ok(()) => Ok(Some(format!(
                        "await expect(page).toHaveURL('{}');",
                        escape_literal(expected)
                    ))),
                    Err(raw) => Err(raw),
                }
            }
            _ => self.run_element_band(page, plan, observation).await,
        };

        match outcome {
            Ok(code) => {
                if mutates_page(plan.action_type) {
                    self.settle(page).await;
                }
                info!(target: "executor", action = plan.action_type.as_str(), "action succeeded");
                match code {
                    Some(code) => ExecResult::ok_with_code(code),
                    None => ExecResult::ok(),
                }
            }
            Err(raw) => failure(&raw),
        }
    }

    // ---- context band ----------------------------------------------------

    async fn run_context_band(&self, plan: &ActionPlan) -> Result<Option<String>, String> {
        let value = plan.value.as_deref().unwrap_or_default();
        match plan.action_type {
            ActionType::SwitchTab => {
                let selector = match value.parse::<usize>() {
                    Ok(index) => TabSelector::Index(index),
                    Err(_) => TabSelector::Matching(value.to_string()),
                };
                let code = match &selector {
                    TabSelector::Index(index) => {
                        format!("await context.pages()[{index}].bringToFront();")
                    }
                    TabSelector::Matching(needle) => {
                        let needle = escape_literal(needle);
                        format!(
                            "for (const p of context.pages()) {{\n  if ((await p.title()).includes('{needle}') || p.url().includes('{needle}')) {{ await p.bringToFront(); break; }}\n}}"
                        )
                    }
                };
                self.context
                    .switch_to(selector)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(Some(code))
            }
            ActionType::CloseTab => {
                self.context
                    .close_active()
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(Some("await page.close();".to_string()))
            }
            ActionType::HandleDialog => {
                let accept = value == "accept";
                self.context
                    .resolve_dialog(accept)
                    .await
                    .map_err(|err| err.to_string())?;
                let method = if accept { "accept" } else { "dismiss" };
                Ok(Some(format!(
                    "page.once('dialog', (dialog) => dialog.{method}());"
                )))
            }
            _ => unreachable!("context band only handles tab and dialog actions"),
        }
    }

    // ---- navigation band -------------------------------------------------

    async fn run_navigation_band(
        &self,
        page: PageId,
        plan: &ActionPlan,
    ) -> Result<Option<String>, String> {
        match plan.action_type {
            ActionType::Navigate => {
                let url = plan.value.as_deref().unwrap_or_default();
                self.adapter
                    .navigate(page, url)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(Some(format!("await page.goto('{}');", escape_literal(url))))
            }
            ActionType::Reload => {
                self.adapter.reload(page).await.map_err(|err| err.to_string())?;
                Ok(Some("await page.reload();".to_string()))
            }
            ActionType::GoBack => {
                self.adapter.go_back(page).await.map_err(|err| err.to_string())?;
                Ok(Some("await page.goBack();".to_string()))
            }
            _ => unreachable!("navigation band only handles navigate/reload/go_back"),
        }
    }

    // ---- scroll ----------------------------------------------------------

    async fn run_scroll(
        &self,
        page: PageId,
        plan: &ActionPlan,
        observation: &Observation,
    ) -> Result<Option<String>, String> {
        if let Some(target_id) = plan.target_id.as_deref().filter(|id| !id.is_empty()) {
            let descriptor = lookup(observation, target_id)?;
            let verified = self
                .synthesizer
                .double_check(page, descriptor)
                .await
                .map_err(|err| err.to_string())?;
            self.on_pick(
                page,
                "el.scrollIntoView({ block: 'center', inline: 'center' }); return ok();",
            )
            .await?;
            return Ok(Some(fragment(
                &verified,
                format!("await {}.scrollIntoViewIfNeeded();", verified.locator),
            )));
        }

        // No target: page-level scroll by most of a viewport.
        self.adapter
            .evaluate(
                page,
                "window.scrollBy(0, Math.round(window.innerHeight * 0.8)); 'ok'",
            )
            .await
            .map_err(|err| err.to_string())?;
        Ok(Some("await page.mouse.wheel(0, 600);".to_string()))
    }

    // ---- element band ----------------------------------------------------

    async fn run_element_band(
        &self,
        page: PageId,
        plan: &ActionPlan,
        observation: &Observation,
    ) -> Result<Option<String>, String> {
        let target_id = plan
            .target_id
            .as_deref()
            .ok_or_else(|| "Target ID is missing".to_string())?;
        let descriptor = lookup(observation, target_id)?;

        if plan.action_type == ActionType::WaitForElement {
            return self.wait_for_element(page, descriptor).await;
        }

        let verified = self
            .synthesizer
            .double_check(page, descriptor)
            .await
            .map_err(|err| err.to_string())?;
        let value = plan.value.as_deref().unwrap_or_default();
        let locator = verified.locator.clone();

        let code = match plan.action_type {
            ActionType::Click => {
                self.mouse_click(page, verified.center, "left", 1).await?;
                format!("await {locator}.click();")
            }
            ActionType::Dblclick => {
                self.mouse_click(page, verified.center, "left", 2).await?;
                format!("await {locator}.dblclick();")
            }
            ActionType::RightClick => {
                self.mouse_click(page, verified.center, "right", 1).await?;
                format!("await {locator}.click({{ button: 'right' }});")
            }
            ActionType::Hover => {
                self.mouse_move(page, verified.center).await?;
                format!("await {locator}.hover();")
            }
            ActionType::Focus => {
                self.on_pick(page, "el.focus(); return ok();").await?;
                format!("await {locator}.focus();")
            }
            ActionType::Clear => {
                self.on_pick(
                    page,
                    "el.value = ''; fire(el, 'input'); fire(el, 'change'); return ok();",
                )
                .await?;
                format!("await {locator}.clear();")
            }
            ActionType::Check => {
                self.on_pick(page, "if (!el.checked) el.click(); return ok();")
                    .await?;
                format!("await {locator}.check();")
            }
            ActionType::Uncheck => {
                self.on_pick(page, "if (el.checked) el.click(); return ok();")
                    .await?;
                format!("await {locator}.uncheck();")
            }
            ActionType::Fill => {
                self.on_pick(
                    page,
                    "el.focus(); if ('value' in el) { el.value = ''; fire(el, 'input'); } return ok();",
                )
                .await?;
                self.adapter
                    .insert_text(page, value)
                    .await
                    .map_err(|err| err.to_string())?;
                format!("await {locator}.fill('{}');", escape_literal(value))
            }
            ActionType::Type => {
                self.on_pick(page, "el.focus(); return ok();").await?;
                for ch in value.chars() {
                    self.adapter
                        .dispatch_key_event(
                            page,
                            json!({ "type": "char", "text": ch.to_string() }),
                        )
                        .await
                        .map_err(|err| err.to_string())?;
                }
                format!(
                    "await {locator}.pressSequentially('{}');",
                    escape_literal(value)
                )
            }
            ActionType::Keypress => {
                self.on_pick(page, "el.focus(); return ok();").await?;
                self.press_key(page, value).await?;
                format!("await {locator}.press('{}');", escape_literal(value))
            }
            ActionType::SelectOption => {
                let by_label = self.select_option(page, value).await?;
                let field = if by_label { "label" } else { "value" };
                format!(
                    "await {locator}.selectOption({{ {field}: '{}' }});",
                    escape_literal(value)
                )
            }
            ActionType::Upload => {
                let files: Vec<String> = value
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                self.upload(page, &files).await?;
                let list = files
                    .iter()
                    .map(|f| format!("'{}'", escape_literal(f)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("await {locator}.setInputFiles([{list}]);")
            }
            ActionType::DragAndDrop => {
                let aux_id = plan.target_id2.as_deref().unwrap_or_default();
                let aux_descriptor = lookup(observation, aux_id)?;
                let aux = self
                    .synthesizer
                    .double_check_into(page, aux_descriptor, PickSlot::Aux)
                    .await
                    .map_err(|err| err.to_string())?;
                self.drag(page, verified.center, aux.center).await?;
                format!("await {locator}.dragTo({});", aux.locator)
            }
            ActionType::AssertVisible => {
                // The double-check already proved unique-and-visible.
                format!("await expect({locator}).toBeVisible();")
            }
            ActionType::AssertText => {
                self.assert_text(page, value).await?;
                format!(
                    "await expect({locator}).toContainText('{}');",
                    escape_literal(value)
                )
            }
            ActionType::AssertValue => {
                self.assert_value(page, value).await?;
                format!(
                    "await expect({locator}).toHaveValue('{}');",
                    escape_literal(value)
                )
            }
            _ => unreachable!("non-element action reached the element band"),
        };

        Ok(Some(fragment(&verified, code)))
    }

    async fn wait_for_element(
        &self,
        page: PageId,
        descriptor: &ElementDescriptor,
    ) -> Result<Option<String>, String> {
        let deadline = Instant::now() + WAIT_FOR_ELEMENT_TIMEOUT;
        loop {
            match self.synthesizer.double_check(page, descriptor).await {
                Ok(verified) => {
                    return Ok(Some(fragment(
                        &verified,
                        format!(
                            "await {}.waitFor({{ state: 'visible', timeout: 10000 }});",
                            verified.locator
                        ),
                    )));
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(format!(
                            "Timeout waiting for element '{}': {err}",
                            descriptor.id
                        ));
                    }
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }

    // ---- primitives ------------------------------------------------------

    /// Run a snippet against the element parked by the double-check. The
    /// snippet sees `el`, `fire(el, type)` and `ok()`.
    async fn on_pick(&self, page: PageId, body: &str) -> Result<Value, String> {
        let script = format!(
            r#"(() => {{
    const el = window.__flashloop_pick;
    if (!el || !el.isConnected) return JSON.stringify({{ status: 'detached' }});
    const fire = (target, type) => target.dispatchEvent(new Event(type, {{ bubbles: true }}));
    const ok = (extra) => JSON.stringify(Object.assign({{ status: 'ok' }}, extra || {{}}));
    {body}
}})()"#
        );
        let value = self
            .adapter
            .evaluate(page, &script)
            .await
            .map_err(|err| err.to_string())?;
        let payload: Value = value
            .as_str()
            .and_then(|text| serde_json::from_str(text).ok())
            .ok_or_else(|| "element primitive returned no status".to_string())?;
        match payload.get("status").and_then(|v| v.as_str()) {
            Some("ok") => Ok(payload),
            Some("detached") => {
                Err("element is detached from the document; re-observe the page".to_string())
            }
            Some(other) => Err(format!("element primitive failed: {other}")),
            None => Err("element primitive returned no status".to_string()),
        }
    }

    async fn mouse_move(&self, page: PageId, (x, y): (f64, f64)) -> Result<(), String> {
        self.adapter
            .dispatch_mouse_event(
                page,
                json!({ "type": "mouseMoved", "x": x, "y": y, "button": "none" }),
            )
            .await
            .map_err(|err| err.to_string())
    }

    async fn mouse_click(
        &self,
        page: PageId,
        center: (f64, f64),
        button: &str,
        clicks: u32,
    ) -> Result<(), String> {
        let (x, y) = center;
        self.mouse_move(page, center).await?;
        for click in 1..=clicks {
            for kind in ["mousePressed", "mouseReleased"] {
                self.adapter
                    .dispatch_mouse_event(
                        page,
                        json!({
                            "type": kind,
                            "x": x,
                            "y": y,
                            "button": button,
                            "clickCount": click,
                        }),
                    )
                    .await
                    .map_err(|err| err.to_string())?;
            }
        }
        Ok(())
    }

    async fn drag(
        &self,
        page: PageId,
        from: (f64, f64),
        to: (f64, f64),
    ) -> Result<(), String> {
        self.mouse_move(page, from).await?;
        self.adapter
            .dispatch_mouse_event(
                page,
                json!({ "type": "mousePressed", "x": from.0, "y": from.1, "button": "left", "clickCount": 1 }),
            )
            .await
            .map_err(|err| err.to_string())?;
        let mid = ((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0);
        for point in [mid, to] {
            self.adapter
                .dispatch_mouse_event(
                    page,
                    json!({ "type": "mouseMoved", "x": point.0, "y": point.1, "button": "left" }),
                )
                .await
                .map_err(|err| err.to_string())?;
        }
        self.adapter
            .dispatch_mouse_event(
                page,
                json!({ "type": "mouseReleased", "x": to.0, "y": to.1, "button": "left", "clickCount": 1 }),
            )
            .await
            .map_err(|err| err.to_string())
    }

    async fn press_key(&self, page: PageId, key: &str) -> Result<(), String> {
        let (key_name, code, virtual_key, text) = key_definition(key);
        self.adapter
            .dispatch_key_event(
                page,
                json!({
                    "type": "rawKeyDown",
                    "key": key_name,
                    "code": code,
                    "windowsVirtualKeyCode": virtual_key,
                }),
            )
            .await
            .map_err(|err| err.to_string())?;
        if let Some(text) = text {
            self.adapter
                .dispatch_key_event(page, json!({ "type": "char", "text": text }))
                .await
                .map_err(|err| err.to_string())?;
        }
        self.adapter
            .dispatch_key_event(
                page,
                json!({
                    "type": "keyUp",
                    "key": key_name,
                    "code": code,
                    "windowsVirtualKeyCode": virtual_key,
                }),
            )
            .await
            .map_err(|err| err.to_string())
    }

    async fn select_option(&self, page: PageId, value: &str) -> Result<bool, String> {
        let wanted = serde_json::to_string(value).map_err(|err| err.to_string())?;
        let body = format!(
            r#"const wanted = {wanted};
    const options = Array.from(el.options || []);
    let matched = options.find((opt) => opt.label === wanted || opt.text === wanted);
    let byLabel = true;
    if (!matched) {{
        matched = options.find((opt) => opt.value === wanted);
        byLabel = false;
    }}
    if (!matched) return JSON.stringify({{ status: 'option-missing' }});
    el.value = matched.value;
    fire(el, 'input');
    fire(el, 'change');
    return ok({{ byLabel }});"#
        );
        let payload = self.on_pick(page, &body).await?;
        Ok(payload
            .get("byLabel")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn upload(&self, page: PageId, files: &[String]) -> Result<(), String> {
        let object_id = self
            .adapter
            .evaluate_to_object(page, "window.__flashloop_pick")
            .await
            .map_err(|err| err.to_string())?;
        let result = self
            .adapter
            .set_file_input(page, &object_id, files)
            .await
            .map_err(|err| err.to_string());
        self.adapter.release_object(page, &object_id).await;
        result
    }

    async fn assert_text(&self, page: PageId, expected: &str) -> Result<(), String> {
        let wanted = serde_json::to_string(expected).map_err(|err| err.to_string())?;
        let body = format!(
            r#"const wanted = {wanted};
    const text = ((el.innerText !== undefined ? el.innerText : el.textContent) || '')
        .replace(/\s+/g, ' ').trim();
    if (!text.includes(wanted)) return JSON.stringify({{ status: 'mismatch', actual: text }});
    return ok();"#
        );
        self.on_pick(page, &body).await.map(|_| ()).map_err(|err| {
            if err.contains("mismatch") {
                format!("Assertion failed: element text does not contain '{expected}'")
            } else {
                err
            }
        })
    }

    async fn assert_value(&self, page: PageId, expected: &str) -> Result<(), String> {
        let wanted = serde_json::to_string(expected).map_err(|err| err.to_string())?;
        let body = format!(
            r#"const wanted = {wanted};
    if ((el.value || '') !== wanted) return JSON.stringify({{ status: 'mismatch', actual: el.value }});
    return ok();"#
        );
        self.on_pick(page, &body).await.map(|_| ()).map_err(|err| {
            if err.contains("mismatch") {
                format!("Assertion failed: element value is not '{expected}'")
            } else {
                err
            }
        })
    }

    async fn assert_url(&self, page: PageId, expected: &str) -> Result<(), String> {
        let actual = self
            .adapter
            .evaluate(page, "window.location.href")
            .await
            .map_err(|err| err.to_string())?;
        let actual = actual.as_str().unwrap_or_default().to_string();
        if actual.trim_end_matches('/') != expected.trim_end_matches('/') {
            return Err(format!(
                "Assertion failed: page URL is '{actual}', expected '{expected}'"
            ));
        }
        Ok(())
    }

    async fn settle(&self, page: PageId) {
        let _ = self
            .adapter
            .wait_for_dom_ready(page, POST_ACTION_DOM_TIMEOUT)
            .await;
        let _ = self
            .adapter
            .wait_for_network_idle(page, POST_ACTION_NETWORK_QUIET, POST_ACTION_NETWORK_TIMEOUT)
            .await;
        match self.stability.wait(&self.adapter, page).await {
            Ok(outcome) if !outcome.achieved => {
                debug!(target: "executor", duration_ms = outcome.duration_ms, "page still busy after action");
            }
            Ok(_) => {}
            Err(err) => debug!(target: "executor", %err, "stability wait failed"),
        }
    }
}

fn lookup<'a>(
    observation: &'a Observation,
    target_id: &str,
) -> Result<&'a ElementDescriptor, String> {
    observation.get(target_id).ok_or_else(|| {
        format!("Target ID '{target_id}' not found in memory. Use an ID from the current state.")
    })
}

fn mutates_page(action: ActionType) -> bool {
    !matches!(
        action,
        ActionType::Finish
            | ActionType::HandleDialog
            | ActionType::AssertVisible
            | ActionType::AssertText
            | ActionType::AssertValue
            | ActionType::AssertUrl
            | ActionType::SwitchTab
            | ActionType::CloseTab
    )
}

fn fragment(verified: &VerifiedSelector, code: String) -> String {
    match verified.warning {
        Some(warning) => format!("// {warning}\n{code}"),
        None => code,
    }
}

fn failure(raw: &str) -> ExecResult {
    let translated = translate_error(raw);
    let retryable = !is_fatal_message(raw);
    ExecResult::fail(translated.to_string(), translated.to_string(), retryable)
}

fn key_definition(key: &str) -> (String, String, u32, Option<String>) {
    match key {
        "Enter" => ("Enter".into(), "Enter".into(), 13, Some("\r".into())),
        "Tab" => ("Tab".into(), "Tab".into(), 9, None),
        "Escape" => ("Escape".into(), "Escape".into(), 27, None),
        "Backspace" => ("Backspace".into(), "Backspace".into(), 8, None),
        "Delete" => ("Delete".into(), "Delete".into(), 46, None),
        "ArrowUp" => ("ArrowUp".into(), "ArrowUp".into(), 38, None),
        "ArrowDown" => ("ArrowDown".into(), "ArrowDown".into(), 40, None),
        "ArrowLeft" => ("ArrowLeft".into(), "ArrowLeft".into(), 37, None),
        "ArrowRight" => ("ArrowRight".into(), "ArrowRight".into(), 39, None),
        "Home" => ("Home".into(), "Home".into(), 36, None),
        "End" => ("End".into(), "End".into(), 35, None),
        "PageUp" => ("PageUp".into(), "PageUp".into(), 33, None),
        "PageDown" => ("PageDown".into(), "PageDown".into(), 34, None),
        " " | "Space" => (" ".into(), "Space".into(), 32, Some(" ".into())),
        other => {
            // Single printable character.
            let text = other.chars().next().map(|c| c.to_string());
            (other.into(), String::new(), 0, text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_markers_cover_planner_input_errors() {
        assert!(is_fatal_message("Action 'click' requires a target element ID"));
        assert!(is_fatal_message("drag_and_drop requires targetId2"));
        assert!(is_fatal_message("Action 'navigate' requires a URL"));
        assert!(is_fatal_message("Unsupported action requested by the planner"));
        assert!(is_fatal_message(
            "Target ID 'btn-1' not found in memory. Use an ID from the current state."
        ));
        assert!(is_fatal_message("Target ID is missing"));
        assert!(!is_fatal_message("TimeoutError: 30000ms exceeded"));
        assert!(!is_fatal_message("no robust selector found for element 'a-1'"));
    }

    #[test]
    fn key_definitions_cover_named_keys() {
        let (key, code, vk, text) = key_definition("Enter");
        assert_eq!((key.as_str(), code.as_str(), vk), ("Enter", "Enter", 13));
        assert_eq!(text.as_deref(), Some("\r"));

        let (key, _, _, text) = key_definition("a");
        assert_eq!(key, "a");
        assert_eq!(text.as_deref(), Some("a"));
    }

    #[test]
    fn failure_results_are_translated_and_classified() {
        let result = failure("TimeoutError: waiting for element");
        assert!(!result.success);
        assert!(result.retryable);
        assert!(result.error.unwrap().starts_with("Timeout:"));

        let result = failure("Target ID 'x' not found in memory.");
        assert!(!result.retryable);
    }
}
