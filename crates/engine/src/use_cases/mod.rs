//! Use cases - User story orchestration.
//!
//! Each module contains use cases for a specific area of the product.
//! Use cases orchestrate ports and domain rules to fulfill user stories.

pub mod bible;
pub mod chapters;
pub mod continuity;
pub mod credits;
pub mod export;
pub mod sequence;

pub use bible::{AssistError, AssistSettings, BibleAssistant};
pub use chapters::{ChapterGenerator, GeneratorSettings};
pub use continuity::{ContextAssembler, ContinuityExtractor};
pub use credits::{CreditLedger, RefundPolicy};
pub use export::ExportManuscript;
pub use sequence::SequenceQueries;
