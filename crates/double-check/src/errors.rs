//! Selector synthesis error model.

use thiserror::Error;

use cdp_adapter::AdapterError;

#[derive(Debug, Error)]
pub enum SelectorError {
    /// Every candidate failed the unique-and-visible check.
    #[error("no robust selector found for element '{element_id}' ({attempts} candidates tried)")]
    FailedRobustSelector { element_id: String, attempts: usize },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
