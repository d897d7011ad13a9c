//! Chapter generation use cases.

mod generate;
mod types;

#[cfg(test)]
mod tests;

pub use generate::{ChapterGenerator, GenerationHandle, GeneratorSettings};
pub use types::{
    GenerateChapter, GeneratedChapter, GenerationError, GenerationEvent, GenerationStage,
};
