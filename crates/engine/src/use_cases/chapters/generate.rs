//! Chapter generation: gate, charge, stream, analyze, commit.

use std::sync::Arc;

use dashmap::DashMap;
use folio_domain::{
    Bible, Chapter, ContinuityRecord, DomainError, GenerationPhase, Manuscript, OutlineId,
    ProjectId, SequenceError, SequenceGate,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{
    GenerateChapter, GeneratedChapter, GenerationError, GenerationEvent, GenerationStage,
};
use crate::infrastructure::config::{DEFAULT_DRAFT_FLUSH_FRAGMENTS, DEFAULT_OUTPUT_LANGUAGE};
use crate::infrastructure::ollama::DEFAULT_OLLAMA_MODEL;
use crate::infrastructure::ports::{
    BibleRepo, ChapterRepo, ClockPort, DraftSnapshot, LlmError, LlmPort, LlmRequest, RepoError,
};
use crate::prompt_templates::{keys, PromptTemplates};
use crate::stores::{ActiveGenerationStore, GenerationLease, PendingWriteQueue};
use crate::use_cases::continuity::{ContextAssembler, ContinuityExtractor};
use crate::use_cases::credits::{Charge, CreditLedger, RefundPolicy};
use crate::use_cases::sequence::{load_project, Project};

const EVENT_BUFFER: usize = 64;
const CHAPTER_TEMPERATURE: f32 = 0.8;
const FIRST_CHAPTER_START: &str = "the opening scene of the story";

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub chapter_model: String,
    pub language: String,
    pub refund_policy: RefundPolicy,
    /// Persist the draft every this many fragments.
    pub flush_every: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            chapter_model: DEFAULT_OLLAMA_MODEL.to_string(),
            language: DEFAULT_OUTPUT_LANGUAGE.to_string(),
            refund_policy: RefundPolicy::default(),
            flush_every: DEFAULT_DRAFT_FLUSH_FRAGMENTS,
        }
    }
}

/// A generation running on its own task.
///
/// Dropping `events` before the task finishes cancels the generation.
pub struct GenerationHandle {
    pub events: mpsc::Receiver<GenerationEvent>,
    cancel: CancellationToken,
    outcome: tokio::task::JoinHandle<Result<GeneratedChapter, GenerationError>>,
}

impl GenerationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the result, discarding events as they arrive.
    pub async fn outcome(self) -> Result<GeneratedChapter, GenerationError> {
        self.collect().await.1
    }

    /// Wait for the result, returning every event emitted on the way.
    pub async fn collect(mut self) -> (Vec<GenerationEvent>, Result<GeneratedChapter, GenerationError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = match self.outcome.await {
            Ok(result) => result,
            Err(join) => Err(GenerationError::TaskAborted(join.to_string())),
        };
        (events, outcome)
    }
}

/// Sends events; a closed receiver turns into a cancellation.
struct EventSink {
    tx: mpsc::Sender<GenerationEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    async fn emit(&self, event: GenerationEvent) {
        if self.tx.send(event).await.is_err() && !self.cancel.is_cancelled() {
            tracing::info!("Event receiver dropped, cancelling generation");
            self.cancel.cancel();
        }
    }

    async fn stage(&self, stage: GenerationStage) {
        self.emit(GenerationEvent::Stage { stage }).await;
    }
}

/// Removes a project's cancellation token when the generation ends.
struct CancelRegistration {
    tokens: Arc<DashMap<ProjectId, CancellationToken>>,
    project_id: ProjectId,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.tokens.remove(&self.project_id);
    }
}

/// Where a failing run got to, for the `Failed` event and the refund.
struct Progress {
    stage: GenerationStage,
    charge: Option<Charge>,
}

#[derive(Clone)]
pub struct ChapterGenerator {
    bibles: Arc<dyn BibleRepo>,
    chapters: Arc<dyn ChapterRepo>,
    llm: Arc<dyn LlmPort>,
    ledger: Arc<CreditLedger>,
    extractor: Arc<ContinuityExtractor>,
    templates: Arc<PromptTemplates>,
    active: ActiveGenerationStore,
    pending: Arc<PendingWriteQueue>,
    clock: Arc<dyn ClockPort>,
    cancellations: Arc<DashMap<ProjectId, CancellationToken>>,
    assembler: ContextAssembler,
    settings: GeneratorSettings,
}

impl ChapterGenerator {
    pub fn new(
        bibles: Arc<dyn BibleRepo>,
        chapters: Arc<dyn ChapterRepo>,
        llm: Arc<dyn LlmPort>,
        ledger: Arc<CreditLedger>,
        extractor: Arc<ContinuityExtractor>,
        templates: Arc<PromptTemplates>,
        active: ActiveGenerationStore,
        pending: Arc<PendingWriteQueue>,
        clock: Arc<dyn ClockPort>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            bibles,
            chapters,
            llm,
            ledger,
            extractor,
            templates,
            active,
            pending,
            clock,
            cancellations: Arc::new(DashMap::new()),
            assembler: ContextAssembler::new(),
            settings,
        }
    }

    /// Start a generation on a new task.
    pub fn spawn(&self, request: GenerateChapter) -> GenerationHandle {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let generator = self.clone();
        let token = cancel.clone();
        let outcome = tokio::spawn(async move { generator.generate(request, tx, token).await });
        GenerationHandle {
            events,
            cancel,
            outcome,
        }
    }

    /// Cancel the project's running generation, if any.
    pub fn cancel(&self, project_id: ProjectId) -> bool {
        match self.cancellations.get(&project_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a generation to completion on the current task.
    #[tracing::instrument(
        skip_all,
        fields(project_id = %request.project_id, outline_id = %request.outline_id, kind = %request.kind)
    )]
    pub async fn generate(
        &self,
        request: GenerateChapter,
        tx: mpsc::Sender<GenerationEvent>,
        cancel: CancellationToken,
    ) -> Result<GeneratedChapter, GenerationError> {
        let events = EventSink { tx, cancel };
        let mut progress = Progress {
            stage: GenerationStage::Validating,
            charge: None,
        };

        match self.run(&request, &events, &mut progress).await {
            Ok(generated) => Ok(generated),
            Err(error) => {
                let refunded = match &progress.charge {
                    Some(charge) => {
                        self.ledger
                            .settle_failure(charge, self.settings.refund_policy, error.charged_failure())
                            .await
                    }
                    None => false,
                };
                tracing::warn!(stage = ?progress.stage, refunded, error = %error, "Chapter generation failed");
                events
                    .emit(GenerationEvent::Failed {
                        stage: progress.stage,
                        message: error.to_string(),
                        refunded,
                    })
                    .await;
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: &GenerateChapter,
        events: &EventSink,
        progress: &mut Progress,
    ) -> Result<GeneratedChapter, GenerationError> {
        let project_id = request.project_id;
        let outline_id = request.outline_id;

        // Validating
        events.stage(GenerationStage::Validating).await;
        if !request.kind.is_chapter() {
            return Err(DomainError::validation(format!(
                "{} is not a chapter generation",
                request.kind
            ))
            .into());
        }
        let lease = self.claim(project_id, outline_id, GenerationPhase::Generating)?;
        let _registration = self.register_cancel(project_id, &events.cancel);

        let Project { bible, manuscript } = self.project(project_id).await?;
        let position = SequenceGate::new(&manuscript, None).check_start(outline_id)?;
        bible.ensure_ready_for_chapter(outline_id)?;
        let entry = manuscript
            .entry_at(position)
            .cloned()
            .ok_or(SequenceError::UnknownEntry(outline_id))?;

        // ContextBuilt
        let context = self.assembler.assemble(
            &manuscript,
            position,
            request.rewrite_instructions.as_deref(),
        );
        let llm_request = self.chapter_request(&bible, &manuscript, position, &context, request)?;
        progress.stage = GenerationStage::ContextBuilt;
        events.stage(GenerationStage::ContextBuilt).await;

        let charge = self.ledger.charge(request.user_id, request.kind).await?;
        progress.charge = Some(charge);

        // Streaming
        progress.stage = GenerationStage::Streaming;
        events.stage(GenerationStage::Streaming).await;
        let now = self.clock.now();
        let mut chapter = manuscript
            .chapter_for(outline_id)
            .cloned()
            .unwrap_or_else(|| Chapter::new(outline_id, entry.title.clone(), now));
        chapter.begin_draft(entry.title.clone(), now);

        let streamed = self
            .stream_into(project_id, &mut chapter, llm_request, events)
            .await;
        if streamed.is_ok() {
            chapter.finish_draft();
        }
        if chapter.pending_prose().is_some() {
            self.persist_draft(project_id, &mut chapter).await;
        }
        streamed?;
        if chapter.pending_prose().is_none() {
            return Err(GenerationError::Stream(LlmError::InvalidResponse(
                "model returned no prose".into(),
            )));
        }

        // Analyzing
        progress.stage = GenerationStage::Analyzing;
        lease.set_phase(GenerationPhase::Analyzing);
        events.stage(GenerationStage::Analyzing).await;
        let record = self.analyze(&mut chapter, &events.cancel).await?;

        // Persisted
        progress.stage = GenerationStage::Persisted;
        let chapter = self.commit(project_id, chapter, record).await?;
        events.stage(GenerationStage::Persisted).await;
        if let Some(record) = &chapter.continuity {
            events
                .emit(GenerationEvent::Completed {
                    outline_id,
                    word_count: chapter.word_count,
                    record: record.clone(),
                })
                .await;
        }

        tracing::info!(
            position,
            word_count = chapter.word_count,
            balance_after = charge.balance_after,
            "Chapter generated"
        );
        Ok(GeneratedChapter {
            chapter,
            credits_spent: charge.amount,
            balance_after: Some(charge.balance_after),
        })
    }

    /// Re-run continuity analysis on a chapter whose last analysis failed.
    /// Not charged.
    #[tracing::instrument(skip(self))]
    pub async fn retry_analysis(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
    ) -> Result<GeneratedChapter, GenerationError> {
        let _lease = self.claim(project_id, outline_id, GenerationPhase::Analyzing)?;

        let Project { manuscript, .. } = self.project(project_id).await?;
        SequenceGate::new(&manuscript, None).check_start(outline_id)?;

        let mut chapter = manuscript
            .chapter_for(outline_id)
            .cloned()
            .ok_or(GenerationError::NothingToAnalyze(outline_id))?;
        if chapter.has_partial_draft() {
            return Err(GenerationError::PartialDraft(outline_id));
        }
        if chapter.pending_prose().is_none() {
            if chapter.is_complete() || !chapter.has_content() {
                return Err(GenerationError::NothingToAnalyze(outline_id));
            }
            // Committed prose that never got a record.
            chapter.draft = Some(chapter.content.clone());
            chapter.finish_draft();
        }

        let record = self.analyze(&mut chapter, &CancellationToken::new()).await?;
        let chapter = self.commit(project_id, chapter, record).await?;
        tracing::info!(word_count = chapter.word_count, "Analysis retried");

        Ok(GeneratedChapter {
            chapter,
            credits_spent: 0,
            balance_after: None,
        })
    }

    fn claim(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
        phase: GenerationPhase,
    ) -> Result<GenerationLease, SequenceError> {
        self.active
            .try_claim(project_id, outline_id, phase, self.clock.now())
            .map_err(|active| SequenceError::GenerationInProgress {
                active: active.outline_id,
                phase: active.phase,
            })
    }

    fn register_cancel(&self, project_id: ProjectId, token: &CancellationToken) -> CancelRegistration {
        self.cancellations.insert(project_id, token.clone());
        CancelRegistration {
            tokens: Arc::clone(&self.cancellations),
            project_id,
        }
    }

    async fn project(&self, project_id: ProjectId) -> Result<Project, GenerationError> {
        load_project(self.bibles.as_ref(), self.chapters.as_ref(), project_id)
            .await?
            .ok_or(GenerationError::ProjectNotFound(project_id))
    }

    fn chapter_request(
        &self,
        bible: &Bible,
        manuscript: &Manuscript,
        position: usize,
        context: &str,
        request: &GenerateChapter,
    ) -> Result<LlmRequest, GenerationError> {
        let entry = manuscript
            .entry_at(position)
            .ok_or(SequenceError::UnknownEntry(request.outline_id))?;
        let bible_json = serde_json::to_string_pretty(&serde_json::json!({
            "core": bible.core,
            "characters": bible.characters,
            "outline": bible.outline,
            "instructions": bible.instructions,
        }))
        .map_err(RepoError::serialization)?;
        let word_target =
            (bible.core.chapter_word_count() * request.kind.length_multiplier()).to_string();
        let start_location = manuscript
            .prior_chapters(position)
            .last()
            .and_then(|(_, chapter)| chapter.continuity.as_ref())
            .map(|record| record.location.clone())
            .unwrap_or_else(|| FIRST_CHAPTER_START.to_string());

        let prompt = self.templates.render(
            keys::CHAPTER_TASK,
            &[
                ("bible_json", &bible_json),
                ("context", context),
                ("title", &entry.title),
                ("summary", &entry.summary),
                ("language", &self.settings.language),
                ("word_target", &word_target),
                ("start_location", &start_location),
            ],
        );

        let mut system = self.templates.get(keys::CHAPTER_SYSTEM).to_string();
        if let Some(modifiers) = bible
            .instructions
            .custom_prompt_modifiers
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            system.push_str("\n\n");
            system.push_str(modifiers);
        }

        Ok(LlmRequest::prompt(prompt)
            .with_system_prompt(system)
            .with_model(&self.settings.chapter_model)
            .with_temperature(CHAPTER_TEMPERATURE))
    }

    /// Append streamed fragments to the chapter's draft until the model
    /// finishes, the stream breaks or the run is cancelled.
    async fn stream_into(
        &self,
        project_id: ProjectId,
        chapter: &mut Chapter,
        llm_request: LlmRequest,
        events: &EventSink,
    ) -> Result<(), GenerationError> {
        let cancel = &events.cancel;
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            stream = self.llm.generate_stream(llm_request) => stream.map_err(GenerationError::Stream)?,
        };

        let flush_every = self.settings.flush_every.max(1);
        let mut fragments = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = events.tx.closed() => {
                    tracing::info!("Event receiver dropped, cancelling generation");
                    cancel.cancel();
                    return Err(GenerationError::Cancelled);
                }
                next = stream.next() => next,
            };
            match next {
                None => return Ok(()),
                Some(Err(error)) => return Err(GenerationError::Stream(error)),
                Some(Ok(fragment)) => {
                    chapter.append_draft(&fragment);
                    fragments += 1;
                    events
                        .emit(GenerationEvent::Fragment {
                            text: fragment,
                            word_count: chapter.draft_word_count(),
                        })
                        .await;
                    if fragments % flush_every == 0 {
                        self.persist_draft(project_id, chapter).await;
                    }
                }
            }
        }
    }

    /// Queue the draft and flush it. A failed write stays queued.
    async fn persist_draft(&self, project_id: ProjectId, chapter: &mut Chapter) {
        let Some(draft) = chapter.draft.clone() else {
            return;
        };
        let snapshot = DraftSnapshot {
            chapter_id: chapter.id,
            outline_id: chapter.outline_id,
            title: chapter.title.clone(),
            draft,
            complete: chapter.draft_complete,
            taken_at: self.clock.now(),
        };
        self.pending.enqueue(project_id, snapshot).await;
        let report = self
            .pending
            .flush_one(project_id, chapter.outline_id, self.chapters.as_ref())
            .await;
        if let Some(id) = report.chapter_id_for(chapter.outline_id) {
            chapter.id = id;
        }
    }

    /// Drop the old record, then extract a new one from the draft.
    async fn analyze(
        &self,
        chapter: &mut Chapter,
        cancel: &CancellationToken,
    ) -> Result<ContinuityRecord, GenerationError> {
        let prose = match chapter.analyzable_prose() {
            Some(prose) => prose.to_string(),
            None if chapter.has_partial_draft() => {
                return Err(GenerationError::PartialDraft(chapter.outline_id))
            }
            None => return Err(GenerationError::NothingToAnalyze(chapter.outline_id)),
        };
        if chapter.discard_continuity(self.clock.now()).is_some() {
            self.chapters.save_continuity(chapter.id, None).await?;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            record = self.extractor.extract(&chapter.title, &prose) => Ok(record?),
        }
    }

    /// Replace content and record in one upsert.
    async fn commit(
        &self,
        project_id: ProjectId,
        mut chapter: Chapter,
        record: ContinuityRecord,
    ) -> Result<Chapter, GenerationError> {
        let prose = chapter.draft.take().unwrap_or_default();
        chapter.commit(prose, record, self.clock.now());
        self.pending.discard(project_id, chapter.outline_id).await;
        chapter.id = self.chapters.save(project_id, &chapter).await?;
        Ok(chapter)
    }
}
