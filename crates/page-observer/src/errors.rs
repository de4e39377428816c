//! Observer error model.

use thiserror::Error;

use cdp_adapter::AdapterError;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
