//! Browser-level events emitted by the adapter.

use flashloop_core_types::PageId;
use serde::{Deserialize, Serialize};

/// JavaScript dialog flavors as reported by the protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    #[serde(rename = "beforeunload")]
    BeforeUnload,
}

impl DialogKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "confirm" => Self::Confirm,
            "prompt" => Self::Prompt,
            "beforeunload" => Self::BeforeUnload,
            _ => Self::Alert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Confirm => "confirm",
            Self::Prompt => "prompt",
            Self::BeforeUnload => "beforeunload",
        }
    }
}

/// Events the context manager (and anything else subscribed) consumes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BrowserEvent {
    /// A new page target appeared (tab, popup, window).
    PageOpened {
        page: PageId,
        opener: Option<PageId>,
        url: Option<String>,
    },
    /// A CDP session is attached; the page is now commandable.
    PageAttached { page: PageId },
    /// The page target was destroyed.
    PageClosed { page: PageId },
    /// The main frame committed a navigation.
    PageNavigated { page: PageId, url: String },
    /// A JavaScript dialog is blocking the page.
    DialogOpening {
        page: PageId,
        kind: DialogKind,
        message: String,
    },
}
