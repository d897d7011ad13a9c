//! Folio domain: story bibles, chapters, continuity records and the rules
//! that decide which chapter may be written next.

extern crate self as folio_domain;

pub mod aggregates;
pub mod entities;
pub mod error;
pub mod ids;
pub mod value_objects;

pub use aggregates::{
    ActiveGeneration, GenerationPhase, Manuscript, SequenceError, SequenceGate, Slot, SlotState,
};

pub use entities::{
    count_words, Bible, Chapter, CharacterProfile, CharacterRole, CoreConcept, OutlineEntry,
    WritingInstructions, DEFAULT_CHAPTER_COUNT, DEFAULT_CHAPTER_WORD_COUNT,
};

pub use error::DomainError;

pub use ids::{ChapterId, CharacterId, OutlineId, ProjectId, UserId};

pub use value_objects::{ContinuityRecord, GenerationKind, NEW_ACCOUNT_CREDITS};
