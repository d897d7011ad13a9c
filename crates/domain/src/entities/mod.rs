//! Domain entities - Core business objects with identity

mod bible;
mod chapter;
mod outline;

pub use bible::{
    Bible, CharacterProfile, CharacterRole, CoreConcept, WritingInstructions,
    DEFAULT_CHAPTER_COUNT, DEFAULT_CHAPTER_WORD_COUNT,
};
pub use chapter::{count_words, Chapter};
pub use outline::OutlineEntry;
