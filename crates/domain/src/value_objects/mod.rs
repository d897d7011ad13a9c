//! Value objects - Immutable objects defined by their attributes

mod continuity;
mod generation;

pub use continuity::ContinuityRecord;
pub use generation::{GenerationKind, NEW_ACCOUNT_CREDITS};
