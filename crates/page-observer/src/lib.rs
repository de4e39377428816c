//! Page observation for the flash-loop agent.
//!
//! Turns a live, mutating, multi-frame, shadow-DOM-containing page into a
//! compact symbolic description plus an addressable catalog of interactable
//! elements, and detects DOM quiescence between actions.

pub mod errors;
pub mod model;
pub mod observer;
pub mod semantic_id;
pub mod stability;

pub use errors::ObserverError;
pub use model::{ElementDescriptor, ExtractResult, Observation, RawElement, SelectorCandidates};
pub use observer::{build_observation, Observer, EXTRACT_SCRIPT};
pub use stability::{StabilityOutcome, StabilityWaiter};
