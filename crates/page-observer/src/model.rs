//! Data model produced by one observation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Raw element record as serialized by the injected extraction script.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawElement {
    pub index: usize,
    pub tag: String,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub title_attr: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub dom_id: Option<String>,
    pub xpath: String,
    #[serde(default)]
    pub frame_chain: Vec<String>,
    pub in_viewport: bool,
    pub scrollable: bool,
    pub sensitive: bool,
    #[serde(default)]
    pub cx: f64,
    #[serde(default)]
    pub cy: f64,
    #[serde(default)]
    pub test_id_count: usize,
    #[serde(default)]
    pub placeholder_count: usize,
    #[serde(default)]
    pub text_count: usize,
}

/// Envelope returned by the extraction script.
#[derive(Clone, Debug, Deserialize)]
pub struct ExtractResult {
    pub url: String,
    pub title: String,
    pub elements: Vec<RawElement>,
}

/// Locator candidates captured for one element. Presence means the datum
/// exists; uniqueness is only what the in-page screen could establish and is
/// re-verified by the selector synthesizer before any use.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SelectorCandidates {
    pub test_id: Option<String>,
    /// Role plus accessible name, both required for a role locator.
    pub role: Option<(String, String)>,
    pub placeholder: Option<String>,
    pub text: Option<String>,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub alt: Option<String>,
}

/// One interactable element as seen by the planner and executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Stable semantic identifier, `<tag>-<hash8>-<occurrence>`.
    pub id: String,
    /// Index into the in-page arena (`window.__flashloop_nodes`) for the
    /// observation that produced this descriptor.
    pub arena_index: usize,
    pub tag: String,
    pub input_type: Option<String>,
    /// Short human description used in the symbolic state.
    pub description: String,
    /// Ordered iframe selectors from the root document to the host frame.
    pub frame_chain: Vec<String>,
    /// Deterministic index-based path, the last-resort locator.
    pub xpath: String,
    pub candidates: SelectorCandidates,
    pub scrollable: bool,
    pub in_viewport: bool,
    pub sensitive: bool,
    /// Element center in top-document viewport coordinates.
    pub center: (f64, f64),
}

/// Result of one observation: symbolic state plus the element catalog.
#[derive(Clone, Debug, Default)]
pub struct Observation {
    pub url: String,
    pub title: String,
    pub state_text: String,
    pub catalog: HashMap<String, ElementDescriptor>,
    /// Interactable elements cataloged but outside the viewport.
    pub offscreen: usize,
}

impl Observation {
    pub fn get(&self, id: &str) -> Option<&ElementDescriptor> {
        self.catalog.get(id)
    }
}
