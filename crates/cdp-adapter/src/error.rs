//! Error model surfaced by the adapter.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("operation timed out")]
    Timeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("target closed")]
    TargetClosed,
    #[error("execution context destroyed")]
    ContextDestroyed,
    #[error("target element not found")]
    TargetNotFound,
    #[error("navigation failed")]
    NavigationFailed,
    #[error("internal error")]
    Internal,
}

/// Enriched error passed back to the layers above the driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn timeout(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true)
    }

    pub fn io(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true)
    }

    pub fn internal(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Internal).with_hint(hint)
    }

    /// True when the error means the page itself went away mid-operation
    /// (navigation tore down the context, or the tab closed).
    pub fn is_page_gone(&self) -> bool {
        matches!(
            self.kind,
            AdapterErrorKind::TargetClosed | AdapterErrorKind::ContextDestroyed
        )
    }

    /// Classify a raw CDP protocol error message into an adapter error.
    ///
    /// The protocol reports context teardown and target loss only through
    /// message text, so the match is on well-known substrings.
    pub fn from_protocol(code: i64, message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        let kind = if lowered.contains("context was destroyed")
            || lowered.contains("cannot find context")
        {
            AdapterErrorKind::ContextDestroyed
        } else if lowered.contains("target closed")
            || lowered.contains("session closed")
            || lowered.contains("no target with given id")
        {
            AdapterErrorKind::TargetClosed
        } else {
            AdapterErrorKind::CdpIo
        };
        Self::new(kind)
            .with_hint(format!("cdp error {}: {}", code, message))
            .retriable(code >= 500)
    }
}
