//! Observation pipeline: injected extraction, catalog construction and the
//! symbolic state text handed to the planner.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use cdp_adapter::CdpAdapter;
use flashloop_core_types::{truncate_chars, PageId};

use crate::errors::ObserverError;
use crate::model::{ElementDescriptor, ExtractResult, Observation, RawElement, SelectorCandidates};
use crate::semantic_id::IdAllocator;

/// The DOM walker evaluated inside the page. Traverses shadow roots and
/// same-origin iframes, parks every interactable node in the per-observation
/// arena and returns the serialized records.
pub const EXTRACT_SCRIPT: &str = include_str!("extract.js");

const DOM_READY_TIMEOUT: Duration = Duration::from_secs(2);
const NETWORK_SETTLE_QUIET: Duration = Duration::from_millis(200);
const NETWORK_SETTLE_TIMEOUT: Duration = Duration::from_millis(500);
const DESCRIPTION_MAX: usize = 60;

pub struct Observer {
    adapter: Arc<CdpAdapter>,
}

impl Observer {
    pub fn new(adapter: Arc<CdpAdapter>) -> Self {
        Self { adapter }
    }

    /// Observe the page: wait for it to settle, run the extraction script and
    /// build the catalog. Re-running the script replaces the previous
    /// observation's arena, releasing its node handles.
    pub async fn observe(&self, page: PageId) -> Result<Observation, ObserverError> {
        if let Ok(ready) = self.adapter.wait_for_dom_ready(page, DOM_READY_TIMEOUT).await {
            if !ready {
                debug!(target: "observer", %page, "document still loading; observing anyway");
            }
        }
        // Short best-effort settle; slow pages are handled by re-observation.
        let _ = self
            .adapter
            .wait_for_network_idle(page, NETWORK_SETTLE_QUIET, NETWORK_SETTLE_TIMEOUT)
            .await;

        let value = self.adapter.evaluate(page, EXTRACT_SCRIPT).await?;
        let payload = value
            .as_str()
            .ok_or_else(|| ObserverError::Extraction("extraction returned no payload".into()))?;
        let raw: ExtractResult = serde_json::from_str(payload)
            .map_err(|err| ObserverError::Extraction(format!("bad extraction payload: {err}")))?;

        let observation = build_observation(raw);
        debug!(
            target: "observer",
            elements = observation.catalog.len(),
            offscreen = observation.offscreen,
            url = %observation.url,
            "observation complete"
        );
        Ok(observation)
    }
}

/// Accessible-name approximation shared with the selector verifier: the
/// first non-empty of aria-label, visible text, placeholder, title, alt,
/// name attribute, DOM id.
fn accessible_name(element: &RawElement) -> Option<String> {
    [
        element.aria_label.as_deref(),
        element.text.as_deref().filter(|t| *t != "[REDACTED]"),
        element.placeholder.as_deref(),
        element.title_attr.as_deref(),
        element.alt.as_deref(),
        element.name.as_deref(),
        element.dom_id.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(str::to_string)
}

fn describe(element: &RawElement) -> String {
    if element.sensitive {
        // Only a label may describe a sensitive field; its content stays
        // redacted even in the description.
        let label = [element.aria_label.as_deref(), element.placeholder.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty());
        return match label {
            Some(label) => truncate_chars(label, DESCRIPTION_MAX),
            None => "[REDACTED]".to_string(),
        };
    }
    let text = accessible_name(element)
        .or_else(|| element.text.clone())
        .unwrap_or_else(|| element.tag.clone());
    truncate_chars(&text, DESCRIPTION_MAX)
}

fn candidates_for(element: &RawElement) -> SelectorCandidates {
    SelectorCandidates {
        // The in-page screen already counted same-document duplicates for
        // these three; ambiguous values are planner noise, not candidates.
        test_id: element
            .test_id
            .clone()
            .filter(|_| element.test_id_count == 1),
        role: element.role.clone().and_then(|role| {
            accessible_name(element).map(|name| (role, name))
        }),
        placeholder: element
            .placeholder
            .clone()
            .filter(|_| element.placeholder_count == 1),
        text: element
            .text
            .clone()
            .filter(|t| !t.is_empty() && *t != "[REDACTED]" && element.text_count == 1),
        aria_label: element.aria_label.clone(),
        title: element.title_attr.clone(),
        alt: element.alt.clone(),
    }
}

/// Build the catalog and state text from the raw extraction. Pure so the
/// whole pipeline below the page boundary is unit-testable.
pub fn build_observation(raw: ExtractResult) -> Observation {
    let mut allocator = IdAllocator::new();
    let mut catalog = std::collections::HashMap::new();
    let mut lines = Vec::new();
    let mut offscreen = 0usize;

    for element in &raw.elements {
        let id = allocator.allocate(element);
        let descriptor = ElementDescriptor {
            id: id.clone(),
            arena_index: element.index,
            tag: element.tag.clone(),
            input_type: element.input_type.clone(),
            description: describe(element),
            frame_chain: element.frame_chain.clone(),
            xpath: element.xpath.clone(),
            candidates: candidates_for(element),
            scrollable: element.scrollable,
            in_viewport: element.in_viewport,
            sensitive: element.sensitive,
            center: (element.cx, element.cy),
        };

        if element.in_viewport {
            lines.push(render_line(&descriptor));
        } else {
            offscreen += 1;
        }
        catalog.insert(id, descriptor);
    }

    let mut state_text = format!("URL: {}\nTitle: {}\n", raw.url, raw.title);
    if lines.is_empty() {
        state_text.push_str("\nNo interactive elements are visible.\n");
    } else {
        state_text.push_str("\nInteractive elements:\n");
        for line in &lines {
            state_text.push_str(line);
            state_text.push('\n');
        }
    }
    if offscreen > 0 {
        state_text.push_str(&format!(
            "... ({offscreen} more items are not visible. Use 'scroll' to explore.)\n"
        ));
    }

    if catalog.is_empty() {
        warn!(target: "observer", url = %raw.url, "observation found no interactable elements");
    }

    Observation {
        url: raw.url,
        title: raw.title,
        state_text,
        catalog,
        offscreen,
    }
}

fn render_line(descriptor: &ElementDescriptor) -> String {
    let mut line = format!("- <{}", descriptor.tag);
    if let Some(input_type) = &descriptor.input_type {
        line.push_str(&format!("[type={input_type}]"));
    }
    line.push_str(&format!(
        "> \"{}\" [ID: {}]",
        descriptor.description, descriptor.id
    ));

    let mut flags = Vec::new();
    if descriptor.scrollable {
        flags.push("Scrollable");
    }
    if !descriptor.frame_chain.is_empty() {
        flags.push("in Iframe");
    }
    if !flags.is_empty() {
        line.push_str(&format!(" ({})", flags.join(", ")));
    }
    line
}
