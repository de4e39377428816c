//! Selector synthesis with the double-check policy: any selector chosen for
//! execution must also be verified unique-and-visible on the live page in
//! the same step, and the accepted candidate is exactly what the recorded
//! script replays.

pub mod code;
pub mod errors;
pub mod synthesize;

pub use code::{escape_literal, locator_base, locator_expression};
pub use errors::SelectorError;
pub use synthesize::{
    candidate_chain, PickSlot, SelectorSynthesizer, Strategy, VerifiedSelector,
};
