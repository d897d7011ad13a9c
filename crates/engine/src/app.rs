//! Application state and composition.

use std::sync::Arc;

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::ports::{BibleRepo, ChapterRepo, ClockPort, CreditRepo, LlmPort};
use crate::prompt_templates::PromptTemplates;
use crate::stores::{ActiveGenerationStore, PendingWriteQueue};
use crate::use_cases::{
    AssistSettings, BibleAssistant, ChapterGenerator, ContinuityExtractor, CreditLedger,
    ExportManuscript, GeneratorSettings, SequenceQueries,
};

/// Main application state.
///
/// Holds the repository ports and use cases.
/// Passed to HTTP handlers via Axum state.
pub struct App {
    pub repositories: Repositories,
    pub use_cases: UseCases,
    pub pending_writes: Arc<PendingWriteQueue>,
    pub active_generations: ActiveGenerationStore,
}

/// Port traits injected directly.
pub struct Repositories {
    pub bible: Arc<dyn BibleRepo>,
    pub chapter: Arc<dyn ChapterRepo>,
    pub credit: Arc<dyn CreditRepo>,
}

/// Container for all use cases.
pub struct UseCases {
    pub credits: Arc<CreditLedger>,
    pub chapters: ChapterGenerator,
    pub sequence: SequenceQueries,
    pub bible: BibleAssistant,
    pub export: ExportManuscript,
}

impl App {
    /// Create a new App with all dependencies wired up.
    pub fn new(
        repositories: Repositories,
        llm: Arc<dyn LlmPort>,
        clock: Arc<dyn ClockPort>,
        templates: PromptTemplates,
        config: &AppConfig,
    ) -> Self {
        let templates = Arc::new(templates);
        let active_generations = ActiveGenerationStore::new();
        let pending_writes = Arc::new(PendingWriteQueue::new());
        let credits = Arc::new(CreditLedger::new(repositories.credit.clone()));

        let extractor = Arc::new(ContinuityExtractor::new(
            llm.clone(),
            templates.clone(),
            &config.analysis_model,
            &config.output_language,
        ));

        let chapters = ChapterGenerator::new(
            repositories.bible.clone(),
            repositories.chapter.clone(),
            llm.clone(),
            credits.clone(),
            extractor,
            templates.clone(),
            active_generations.clone(),
            pending_writes.clone(),
            clock,
            GeneratorSettings {
                chapter_model: config.chapter_model.clone(),
                language: config.output_language.clone(),
                refund_policy: config.refund_policy,
                flush_every: config.draft_flush_fragments,
            },
        );

        let sequence = SequenceQueries::new(
            repositories.bible.clone(),
            repositories.chapter.clone(),
            active_generations.clone(),
        );

        let bible = BibleAssistant::new(
            repositories.bible.clone(),
            repositories.chapter.clone(),
            llm,
            credits.clone(),
            templates,
            AssistSettings {
                model: config.chapter_model.clone(),
                language: config.output_language.clone(),
                refund_policy: config.refund_policy,
            },
        );

        let export = ExportManuscript::new(repositories.bible.clone(), repositories.chapter.clone());

        Self {
            repositories,
            use_cases: UseCases {
                credits,
                chapters,
                sequence,
                bible,
                export,
            },
            pending_writes,
            active_generations,
        }
    }
}
