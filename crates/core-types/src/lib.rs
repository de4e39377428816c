//! Shared primitives used across the flash-loop crates.
//!
//! Identifiers are uuid-backed newtypes so pages and frames can be tracked
//! across the adapter, observer and agent layers without leaking protocol
//! strings into the domain types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for the browser instance owned by the adapter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BrowserId(pub Uuid);

/// Unique identifier for a page/tab.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

/// Unique identifier for a frame within a page.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub Uuid);

impl BrowserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BrowserId {
    fn default() -> Self {
        Self::new()
    }
}

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Truncate `text` to at most `max` characters, appending an ellipsis when
/// anything was cut. Operates on char boundaries, never bytes.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}

/// Collapse all runs of whitespace in `text` into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
