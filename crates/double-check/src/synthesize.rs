//! The double-check policy: a selector is only used if it matches exactly
//! one visible node on the live page at this very moment.
//!
//! Candidates are tried in robustness order; each attempt resolves the frame
//! chain, collects matches for the strategy, and on success parks the node
//! in a well-known window slot for the executor. The accepted candidate is
//! also the one that gets recorded into the output script.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use cdp_adapter::CdpAdapter;
use flashloop_core_types::PageId;
use page_observer::ElementDescriptor;

use crate::code::locator_expression;
use crate::errors::SelectorError;

/// Candidate strategies in fallback order.
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    TestId { test_id: String },
    Role { role: String, name: String },
    Placeholder { placeholder: String },
    Text { text: String },
    XPath { xpath: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::TestId { .. } => "test-id",
            Strategy::Role { .. } => "role",
            Strategy::Placeholder { .. } => "placeholder",
            Strategy::Text { .. } => "text",
            Strategy::XPath { .. } => "xpath",
        }
    }
}

/// Which window slot receives the verified node. Drag-and-drop needs two
/// elements resolved in the same step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PickSlot {
    Primary,
    Aux,
}

impl PickSlot {
    pub fn global(&self) -> &'static str {
        match self {
            PickSlot::Primary => "window.__flashloop_pick",
            PickSlot::Aux => "window.__flashloop_aux",
        }
    }
}

/// A selector that passed the unique-and-visible check.
#[derive(Clone, Debug)]
pub struct VerifiedSelector {
    pub strategy: Strategy,
    /// Playwright locator expression reproducing the accepted candidate.
    pub locator: String,
    /// Present when the locator is brittle and the recorded script should
    /// say so.
    pub warning: Option<&'static str>,
    /// Element center in top-document viewport coordinates.
    pub center: (f64, f64),
    pub slot: PickSlot,
}

#[derive(Debug, Deserialize)]
struct VerifyPayload {
    status: String,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    cx: f64,
    #[serde(default)]
    cy: f64,
}

pub struct SelectorSynthesizer {
    adapter: Arc<CdpAdapter>,
}

impl SelectorSynthesizer {
    pub fn new(adapter: Arc<CdpAdapter>) -> Self {
        Self { adapter }
    }

    /// Find the first candidate that uniquely matches a visible element and
    /// park that element for the executor.
    pub async fn double_check(
        &self,
        page: PageId,
        descriptor: &ElementDescriptor,
    ) -> Result<VerifiedSelector, SelectorError> {
        self.double_check_into(page, descriptor, PickSlot::Primary)
            .await
    }

    pub async fn double_check_into(
        &self,
        page: PageId,
        descriptor: &ElementDescriptor,
        slot: PickSlot,
    ) -> Result<VerifiedSelector, SelectorError> {
        let candidates = candidate_chain(descriptor);
        let attempts = candidates.len();

        for strategy in candidates {
            let script = verify_script(&descriptor.frame_chain, &strategy, slot);
            let outcome = match self.adapter.evaluate(page, &script).await {
                Ok(value) => parse_payload(value),
                Err(err) => {
                    debug!(
                        target: "double-check",
                        strategy = strategy.name(),
                        %err,
                        "candidate verification errored; trying next"
                    );
                    continue;
                }
            };

            match outcome {
                Some(payload) if payload.status == "ok" && payload.count == 1 => {
                    let warning = matches!(strategy, Strategy::XPath { .. }).then_some(
                        "No robust selector was available; this XPath may break on layout changes.",
                    );
                    let locator = locator_expression(&descriptor.frame_chain, &strategy);
                    debug!(
                        target: "double-check",
                        strategy = strategy.name(),
                        %locator,
                        "candidate accepted"
                    );
                    return Ok(VerifiedSelector {
                        strategy,
                        locator,
                        warning,
                        center: (payload.cx, payload.cy),
                        slot,
                    });
                }
                Some(payload) => {
                    debug!(
                        target: "double-check",
                        strategy = strategy.name(),
                        status = %payload.status,
                        count = payload.count,
                        "candidate rejected"
                    );
                }
                None => {
                    debug!(
                        target: "double-check",
                        strategy = strategy.name(),
                        "candidate returned an unreadable payload"
                    );
                }
            }
        }

        Err(SelectorError::FailedRobustSelector {
            element_id: descriptor.id.clone(),
            attempts,
        })
    }
}

fn parse_payload(value: Value) -> Option<VerifyPayload> {
    let text = value.as_str()?;
    serde_json::from_str(text).ok()
}

/// Candidate strategies for one descriptor, strongest first, XPath always
/// last.
pub fn candidate_chain(descriptor: &ElementDescriptor) -> Vec<Strategy> {
    let mut chain = Vec::new();
    let candidates = &descriptor.candidates;

    if let Some(test_id) = &candidates.test_id {
        chain.push(Strategy::TestId {
            test_id: test_id.clone(),
        });
    }
    if let Some((role, name)) = &candidates.role {
        chain.push(Strategy::Role {
            role: role.clone(),
            name: name.clone(),
        });
    }
    if let Some(placeholder) = &candidates.placeholder {
        chain.push(Strategy::Placeholder {
            placeholder: placeholder.clone(),
        });
    }
    if let Some(text) = &candidates.text {
        chain.push(Strategy::Text { text: text.clone() });
    }
    chain.push(Strategy::XPath {
        xpath: descriptor.xpath.clone(),
    });
    chain
}

/// Build the in-page verification expression for one candidate.
fn verify_script(frame_chain: &[String], strategy: &Strategy, slot: PickSlot) -> String {
    let chain_json = serde_json::to_string(frame_chain).unwrap_or_else(|_| "[]".to_string());
    let collect = collect_snippet(strategy);
    let slot_global = slot.global();

    format!(
        r#"(() => {{
    const chain = {chain_json};
    let doc = document;
    for (const frameSelector of chain) {{
        const host = doc.querySelector(frameSelector);
        doc = host && (host.contentDocument || (host.contentWindow ? host.contentWindow.document : null));
        if (!doc) return JSON.stringify({{ status: 'frame-missing' }});
    }}
    const collapse = (t) => (t || '').replace(/\s+/g, ' ').trim();
    const elementText = (el) => collapse(el.innerText !== undefined ? el.innerText : el.textContent);
    const implicitRole = (el) => {{
        const tag = el.tagName.toLowerCase();
        if (tag === 'button') return 'button';
        if (tag === 'a' && el.hasAttribute('href')) return 'link';
        if (tag === 'select') return 'combobox';
        if (tag === 'textarea') return 'textbox';
        if (tag === 'input') {{
            const type = (el.getAttribute('type') || 'text').toLowerCase();
            if (type === 'checkbox') return 'checkbox';
            if (type === 'radio') return 'radio';
            if (type === 'button' || type === 'submit' || type === 'reset') return 'button';
            return 'textbox';
        }}
        return null;
    }};
    const accName = (el) => {{
        const sources = [
            el.getAttribute && el.getAttribute('aria-label'),
            elementText(el),
            el.getAttribute && el.getAttribute('placeholder'),
            el.getAttribute && el.getAttribute('title'),
            el.getAttribute && el.getAttribute('alt'),
            el.getAttribute && el.getAttribute('name'),
            el.id
        ];
        for (const source of sources) {{
            const value = collapse(source || '');
            if (value) return value;
        }}
        return '';
    }};
    let matches = [];
    {collect}
    if (matches.length !== 1) {{
        return JSON.stringify({{ status: 'ambiguous', count: matches.length }});
    }}
    const el = matches[0];
    const win = el.ownerDocument.defaultView || window;
    const style = win.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    const visible = style.display !== 'none' && style.visibility !== 'hidden' &&
        parseFloat(style.opacity) > 0 && rect.width > 0 && rect.height > 0;
    if (!visible) return JSON.stringify({{ status: 'hidden', count: 1 }});
    let cx = rect.left + rect.width / 2;
    let cy = rect.top + rect.height / 2;
    let w = win;
    while (w && w !== window && w.frameElement) {{
        const frameRect = w.frameElement.getBoundingClientRect();
        cx += frameRect.left;
        cy += frameRect.top;
        w = w.parent;
    }}
    {slot_global} = el;
    return JSON.stringify({{ status: 'ok', count: 1, cx, cy }});
}})()"#
    )
}

fn collect_snippet(strategy: &Strategy) -> String {
    match strategy {
        Strategy::TestId { test_id } => {
            let needle = serde_json::to_string(test_id).unwrap_or_default();
            format!(
                "matches = Array.from(doc.querySelectorAll('[data-testid=' + JSON.stringify({needle}) + ']'));"
            )
        }
        Strategy::Role { role, name } => {
            let role_json = serde_json::to_string(role).unwrap_or_default();
            let name_json = serde_json::to_string(name).unwrap_or_default();
            format!(
                "const wantedRole = {role_json};\n    const wantedName = {name_json};\n    \
                 matches = Array.from(doc.querySelectorAll('*')).filter((el) => {{\n        \
                 const role = el.getAttribute('role') || implicitRole(el);\n        \
                 return role === wantedRole && accName(el) === wantedName;\n    }});"
            )
        }
        Strategy::Placeholder { placeholder } => {
            let needle = serde_json::to_string(placeholder).unwrap_or_default();
            format!(
                "matches = Array.from(doc.querySelectorAll('[placeholder=' + JSON.stringify({needle}) + ']'));"
            )
        }
        Strategy::Text { text } => {
            let needle = serde_json::to_string(text).unwrap_or_default();
            format!(
                "const wanted = {needle};\n    \
                 matches = Array.from(doc.querySelectorAll('*')).filter((el) => {{\n        \
                 if (elementText(el) !== wanted) return false;\n        \
                 return !Array.from(el.children).some((child) => elementText(child) === wanted);\n    }});"
            )
        }
        Strategy::XPath { xpath } => {
            let expr = serde_json::to_string(xpath).unwrap_or_default();
            format!(
                "const snapshot = doc.evaluate({expr}, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);\n    \
                 for (let i = 0; i < snapshot.snapshotLength; i++) matches.push(snapshot.snapshotItem(i));"
            )
        }
    }
}
