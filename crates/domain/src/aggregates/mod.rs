//! Aggregate roots - domain objects that own their related data
//!
//! Each aggregate:
//! - Owns all its constituent parts (enforced by Rust ownership)
//! - Exposes behavior through methods, not public fields
//! - Keeps its indexes consistent by rebuilding them on mutation

pub mod manuscript;
pub mod sequence_gate;

pub use manuscript::{Manuscript, Slot};
pub use sequence_gate::{
    ActiveGeneration, GenerationPhase, SequenceError, SequenceGate, SlotState,
};
