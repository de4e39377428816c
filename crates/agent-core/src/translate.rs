//! Driver-error translation.
//!
//! Raw driver errors are useless to the planner ("TimeoutError: waiting for
//! selector..."), so every failure is mapped to a category label plus
//! concrete next-step advice before it reaches history or the next prompt.

use std::fmt;

use flashloop_core_types::truncate_chars;

const UNKNOWN_MESSAGE_MAX: usize = 200;

/// A category label plus actionable advice derived from a raw driver error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatedError {
    pub category: &'static str,
    pub advice: String,
}

impl fmt::Display for TranslatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.advice)
    }
}

/// Map a raw error message to planner-facing advice. First match wins.
pub fn translate_error(raw: &str) -> TranslatedError {
    let lowered = raw.to_lowercase();

    if lowered.contains("timeout") || lowered.contains("timed out") {
        return TranslatedError {
            category: "Timeout",
            advice: "The action did not complete in time. The element may appear after \
                     scrolling or waiting; try 'scroll' or 'wait_for_element', or pick a \
                     different element."
                .to_string(),
        };
    }
    if lowered.contains("intercept") {
        return TranslatedError {
            category: "Interaction-intercepted",
            advice: "Another element (an overlay, modal or cookie banner) is covering the \
                     target. Close or interact with the covering element first."
                .to_string(),
        };
    }
    if lowered.contains("detached") || lowered.contains("stale") {
        return TranslatedError {
            category: "Stale-element",
            advice: "The element was removed or replaced since the last observation. \
                     Re-observe the page and use a fresh element ID."
                .to_string(),
        };
    }
    if lowered.contains("not visible") || lowered.contains("hidden") {
        return TranslatedError {
            category: "Not-visible",
            advice: "The element exists but is not visible. Scroll it into view or open \
                     the menu/section that reveals it before interacting."
                .to_string(),
        };
    }
    if lowered.contains("navigat") {
        return TranslatedError {
            category: "Navigation-failed",
            advice: "The navigation did not succeed. Check the URL, or reach the page by \
                     clicking a link instead."
                .to_string(),
        };
    }
    if lowered.contains("no robust selector") {
        return TranslatedError {
            category: "Selector-synthesis-failed",
            advice: "No unique visible selector could be built for that element. Target a \
                     different element, or scroll so the element is fully on screen."
                .to_string(),
        };
    }

    TranslatedError {
        category: "Unknown",
        advice: format!(
            "Unexpected error: {}. Re-observe the page and try a different approach.",
            truncate_chars(raw, UNKNOWN_MESSAGE_MAX)
        ),
    }
}
