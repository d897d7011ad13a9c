//! Continuity: what the next chapter must stay consistent with.
//!
//! - `ContextAssembler` turns earlier chapters into the briefing for the next one.
//! - `ContinuityExtractor` turns finished prose into a `ContinuityRecord`.

mod context;
mod extractor;

pub use context::{ContextAssembler, OPENING_INSTRUCTION};
pub use extractor::{ContinuityExtractor, ExtractionError};
