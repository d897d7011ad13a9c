use std::sync::Arc;

use chrono::Utc;
use folio_domain::{Bible, Chapter, GenerationKind, OutlineId, SequenceError, UserId};
use tokio::sync::mpsc;

use super::*;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::ports::LlmError;
use crate::prompt_templates::PromptTemplates;
use crate::stores::{ActiveGenerationStore, PendingWriteQueue};
use crate::test_fixtures::{
    analysis_json, ready_bible, record, InMemoryBibleRepo, InMemoryChapterRepo,
    InMemoryCreditRepo, ScriptedLlm,
};
use crate::use_cases::continuity::ContinuityExtractor;
use crate::use_cases::credits::{CreditLedger, LedgerError, RefundPolicy};
use crate::use_cases::sequence::{SequenceQueries, SequenceQueryError};

struct Harness {
    generator: ChapterGenerator,
    queries: SequenceQueries,
    chapters: Arc<InMemoryChapterRepo>,
    credits: Arc<InMemoryCreditRepo>,
    llm: Arc<ScriptedLlm>,
    active: ActiveGenerationStore,
    bible: Bible,
    user: UserId,
}

impl Harness {
    fn new(titles: &[&str], llm: ScriptedLlm) -> Self {
        Self::with(ready_bible(UserId::new(), titles), llm, 100, RefundPolicy::Never)
    }

    fn with(bible: Bible, llm: ScriptedLlm, balance: u64, refund_policy: RefundPolicy) -> Self {
        let user = bible.owner;
        let bibles = Arc::new(InMemoryBibleRepo::with(bible.clone()));
        let chapters = Arc::new(InMemoryChapterRepo::new());
        let credits = Arc::new(InMemoryCreditRepo::with_balance(user, balance));
        let llm = Arc::new(llm);
        let active = ActiveGenerationStore::new();
        let templates = Arc::new(PromptTemplates::defaults());
        let extractor = Arc::new(ContinuityExtractor::new(
            llm.clone(),
            templates.clone(),
            "analysis-model",
            "English",
        ));
        let settings = GeneratorSettings {
            chapter_model: "chapter-model".into(),
            language: "English".into(),
            refund_policy,
            flush_every: 1,
        };
        let generator = ChapterGenerator::new(
            bibles.clone(),
            chapters.clone(),
            llm.clone(),
            Arc::new(CreditLedger::new(credits.clone())),
            extractor,
            templates,
            active.clone(),
            Arc::new(PendingWriteQueue::new()),
            Arc::new(SystemClock::new()),
            settings,
        );
        let queries = SequenceQueries::new(bibles, chapters.clone(), active.clone());
        Self {
            generator,
            queries,
            chapters,
            credits,
            llm,
            active,
            bible,
            user,
        }
    }

    fn outline_id(&self, position: usize) -> OutlineId {
        self.bible.outline[position].id
    }

    fn request(&self, position: usize, kind: GenerationKind) -> GenerateChapter {
        GenerateChapter {
            project_id: self.bible.id,
            outline_id: self.outline_id(position),
            user_id: self.user,
            kind,
            rewrite_instructions: None,
        }
    }

    fn chapter(&self, position: usize) -> Option<Chapter> {
        self.chapters.chapter(self.bible.id, self.outline_id(position))
    }

    fn finish(&self, position: usize, prose: &str, location: &str) {
        let entry = &self.bible.outline[position];
        self.chapters.insert(
            self.bible.id,
            Chapter::new(entry.id, entry.title.clone(), Utc::now())
                .with_content(prose)
                .with_continuity(record(location, &[])),
        );
    }
}

fn failed_event(events: &[GenerationEvent]) -> Option<&GenerationEvent> {
    events
        .iter()
        .find(|event| matches!(event, GenerationEvent::Failed { .. }))
}

#[tokio::test]
async fn sequential_generation_unlocks_the_next_chapter() {
    let llm = ScriptedLlm::new()
        .stream(&["Ines waited ", "on the dock."])
        .reply(analysis_json("dock at midnight", &["lantern"]))
        .stream(&["The lantern ", "guttered."])
        .reply(analysis_json("the customs house", &["lantern", "ledger"]));
    let h = Harness::new(&["A", "B", "C"], llm);
    let (b, c) = (h.outline_id(1), h.outline_id(2));

    let err = h.queries.can_generate(h.bible.id, c).await.unwrap_err();
    assert!(matches!(
        err,
        SequenceQueryError::Sequence(SequenceError::SequenceViolation { blocked_by, .. }) if blocked_by == b
    ));
    assert_eq!(h.credits.balance(h.user), 100);

    let (events, outcome) = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .collect()
        .await;
    let generated = outcome.expect("chapter A");

    assert_eq!(h.credits.balance(h.user), 95);
    assert_eq!(generated.balance_after, Some(95));
    assert_eq!(generated.chapter.content, "Ines waited on the dock.");
    assert_eq!(
        events.first(),
        Some(&GenerationEvent::Stage {
            stage: GenerationStage::Validating
        })
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, GenerationEvent::Completed { .. })));

    let stored = h.chapter(0).expect("stored chapter");
    assert!(stored.is_complete());
    assert!(stored.draft.is_none());
    assert!(h.queries.can_generate(h.bible.id, b).await.is_ok());

    let context = h.queries.get_context(h.bible.id, b, None).await.expect("context");
    assert!(context.contains("STARTING LOCATION: dock at midnight"));
    assert!(context.contains("INVENTORY/STATUS: lantern"));

    let generated_b = h
        .generator
        .spawn(h.request(1, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .expect("chapter B");
    let chapter_b_prompt = h.llm.prompt_of(2);
    assert!(chapter_b_prompt.contains("STARTING LOCATION: dock at midnight"));
    assert!(chapter_b_prompt.contains("Chapter 1: A"));

    assert_eq!(generated_b.balance_after, Some(90));
    assert_eq!(h.credits.balance(h.user), 90);
    assert!(h.chapter(1).expect("stored B").is_complete());
    assert!(h.queries.can_generate(h.bible.id, c).await.is_ok());
    let context = h.queries.get_context(h.bible.id, c, None).await.expect("context");
    assert!(context.contains("STARTING LOCATION: the customs house"));
}

#[tokio::test]
async fn chapter_request_uses_chapter_model_and_word_target() {
    let llm = ScriptedLlm::new()
        .stream(&["Long prose."])
        .reply(analysis_json("the bell tower", &[]));
    let h = Harness::new(&["A"], llm);

    h.generator
        .spawn(h.request(0, GenerationKind::ChapterLong))
        .outcome()
        .await
        .expect("chapter");

    let requests = h.llm.requests();
    assert_eq!(requests[0].model.as_deref(), Some("chapter-model"));
    assert_eq!(requests[1].model.as_deref(), Some("analysis-model"));
    assert!(h.llm.prompt_of(0).contains("3000 words"));
    assert_eq!(h.credits.balance(h.user), 92);
}

#[tokio::test]
async fn insufficient_funds_stops_before_the_model() {
    let h = Harness::with(
        ready_bible(UserId::new(), &["A"]),
        ScriptedLlm::new(),
        3,
        RefundPolicy::Never,
    );

    let (events, outcome) = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .collect()
        .await;

    assert!(matches!(
        outcome.unwrap_err(),
        GenerationError::Credits(LedgerError::InsufficientFunds {
            required: 5,
            available: 3
        })
    ));
    assert_eq!(h.llm.request_count(), 0);
    assert_eq!(h.credits.balance(h.user), 3);
    assert!(h.active.is_empty());
    assert!(matches!(
        failed_event(&events),
        Some(GenerationEvent::Failed { refunded: false, .. })
    ));
}

#[tokio::test]
async fn incomplete_bible_is_a_precondition_error_without_charge() {
    let mut bible = ready_bible(UserId::new(), &["A"]);
    bible.core.theme.clear();
    let h = Harness::with(bible, ScriptedLlm::new(), 100, RefundPolicy::Never);

    let err = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Precondition(_)));
    assert_eq!(h.credits.balance(h.user), 100);
    assert_eq!(h.llm.request_count(), 0);
}

#[tokio::test]
async fn locked_position_is_refused_without_charge() {
    let h = Harness::new(&["A", "B", "C"], ScriptedLlm::new());

    let err = h
        .generator
        .spawn(h.request(2, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::Sequence(SequenceError::SequenceViolation { .. })
    ));
    assert_eq!(h.credits.balance(h.user), 100);
    assert!(h.active.is_empty());
}

#[tokio::test]
async fn stream_failure_keeps_partial_draft_and_committed_content() {
    let llm = ScriptedLlm::new().stream_then_fail(
        &["Half a "],
        LlmError::StreamInterrupted("connection reset".into()),
    );
    let h = Harness::new(&["A", "B"], llm);
    h.finish(0, "Old prose.", "Old mill");

    let (events, outcome) = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .collect()
        .await;

    assert!(matches!(outcome.unwrap_err(), GenerationError::Stream(_)));
    let chapter = h.chapter(0).expect("chapter");
    assert_eq!(chapter.content, "Old prose.");
    assert_eq!(chapter.draft.as_deref(), Some("Half a "));
    assert!(chapter.has_partial_draft());
    assert_eq!(
        chapter.continuity.map(|r| r.location),
        Some("Old mill".to_string())
    );
    assert_eq!(h.credits.balance(h.user), 95);
    assert!(matches!(
        failed_event(&events),
        Some(GenerationEvent::Failed {
            stage: GenerationStage::Streaming,
            refunded: false,
            ..
        })
    ));
}

#[tokio::test]
async fn interrupted_first_chapter_cannot_be_committed_by_retry() {
    let llm = ScriptedLlm::new()
        .stream_then_fail(&["Half a "], LlmError::StreamInterrupted("connection reset".into()))
        .reply(analysis_json("dock at midnight", &[]));
    let h = Harness::new(&["A", "B"], llm);
    let (a, b) = (h.outline_id(0), h.outline_id(1));

    h.generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    let err = h.generator.retry_analysis(h.bible.id, a).await.unwrap_err();

    assert!(matches!(err, GenerationError::PartialDraft(id) if id == a));
    assert_eq!(h.llm.request_count(), 1, "no analysis call for a partial draft");
    let chapter = h.chapter(0).expect("draft kept");
    assert!(!chapter.has_content());
    assert!(!chapter.is_complete());
    assert!(h.queries.can_generate(h.bible.id, b).await.is_err());
    assert!(h.active.is_empty());
}

#[tokio::test]
async fn interrupted_regeneration_keeps_the_committed_chapter() {
    let llm = ScriptedLlm::new()
        .stream_then_fail(&["Half a "], LlmError::StreamInterrupted("connection reset".into()))
        .reply(analysis_json("dock at midnight", &[]));
    let h = Harness::new(&["A", "B"], llm);
    h.finish(0, "Full old chapter prose.", "Old mill");
    let (a, b) = (h.outline_id(0), h.outline_id(1));

    h.generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    let err = h.generator.retry_analysis(h.bible.id, a).await.unwrap_err();

    assert!(matches!(err, GenerationError::PartialDraft(_)));
    let chapter = h.chapter(0).expect("A");
    assert_eq!(chapter.content, "Full old chapter prose.");
    assert_eq!(
        chapter.continuity.map(|r| r.location),
        Some("Old mill".to_string())
    );
    assert!(h.queries.can_generate(h.bible.id, b).await.is_ok());
}

#[tokio::test]
async fn refund_policy_returns_credits_on_failure() {
    let llm = ScriptedLlm::new().stream_refused(LlmError::RequestFailed("503: busy".into()));
    let h = Harness::with(
        ready_bible(UserId::new(), &["A"]),
        llm,
        100,
        RefundPolicy::OnFailure,
    );

    let (events, outcome) = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .collect()
        .await;

    assert!(outcome.is_err());
    assert_eq!(h.credits.balance(h.user), 100);
    assert!(matches!(
        failed_event(&events),
        Some(GenerationEvent::Failed { refunded: true, .. })
    ));
}

#[tokio::test]
async fn extraction_failure_fails_closed_and_retry_recovers_for_free() {
    let llm = ScriptedLlm::new()
        .stream(&["Ines climbed the stairs."])
        .reply("Sorry, I cannot help with that.")
        .reply(analysis_json("top of the lighthouse", &["brass key"]));
    let h = Harness::new(&["A", "B"], llm);
    let (a, b) = (h.outline_id(0), h.outline_id(1));

    let err = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Extraction(_)));
    let chapter = h.chapter(0).expect("draft kept");
    assert!(chapter.continuity.is_none());
    assert_eq!(chapter.draft.as_deref(), Some("Ines climbed the stairs."));
    assert!(h.queries.can_generate(h.bible.id, b).await.is_err());

    let retried = h
        .generator
        .retry_analysis(h.bible.id, a)
        .await
        .expect("retry");

    assert_eq!(retried.credits_spent, 0);
    assert_eq!(h.credits.balance(h.user), 95);
    assert_eq!(retried.chapter.content, "Ines climbed the stairs.");
    assert!(h.chapter(0).expect("chapter").is_complete());
    assert!(h.queries.can_generate(h.bible.id, b).await.is_ok());
}

#[tokio::test]
async fn retry_analysis_without_prose_is_refused() {
    let h = Harness::new(&["A"], ScriptedLlm::new());

    let err = h
        .generator
        .retry_analysis(h.bible.id, h.outline_id(0))
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::NothingToAnalyze(_)));
}

#[tokio::test]
async fn regeneration_replaces_record_and_leaves_later_chapters_alone() {
    let llm = ScriptedLlm::new()
        .stream(&["New opening."])
        .reply(analysis_json("the new quay", &["oar"]));
    let h = Harness::new(&["A", "B", "C"], llm);
    h.finish(0, "Old opening.", "Old mill");
    h.finish(1, "Middle.", "Tower roof");
    let (b, c) = (h.outline_id(1), h.outline_id(2));
    let before_b = h.chapter(1).expect("B");

    h.generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .expect("regenerated");

    let a = h.chapter(0).expect("A");
    assert_eq!(a.content, "New opening.");
    assert_eq!(a.continuity.map(|r| r.location), Some("the new quay".into()));
    assert_eq!(h.chapter(1), Some(before_b));
    assert!(h.queries.can_generate(h.bible.id, c).await.is_ok());
    let context = h.queries.get_context(h.bible.id, b, None).await.expect("context");
    assert!(context.contains("STARTING LOCATION: the new quay"));
}

#[tokio::test]
async fn failed_reanalysis_locks_the_next_position() {
    let llm = ScriptedLlm::new().stream(&["New opening."]).reply("{}");
    let h = Harness::new(&["A", "B"], llm);
    h.finish(0, "Old opening.", "Old mill");
    let b = h.outline_id(1);

    let err = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Extraction(_)));
    let a = h.chapter(0).expect("A");
    assert_eq!(a.content, "Old opening.");
    assert!(a.continuity.is_none());
    assert!(h.queries.can_generate(h.bible.id, b).await.is_err());
}

#[tokio::test]
async fn cancel_keeps_draft_and_releases_the_project() {
    let llm = ScriptedLlm::new().stream_then_stall(&["First words "]);
    let h = Harness::new(&["A"], llm);

    let mut handle = h.generator.spawn(h.request(0, GenerationKind::ChapterNormal));
    while let Some(event) = handle.events.recv().await {
        if matches!(event, GenerationEvent::Fragment { .. }) {
            break;
        }
    }
    assert!(h.generator.cancel(h.bible.id));

    let err = handle.outcome().await.unwrap_err();

    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(
        h.chapter(0).and_then(|c| c.draft),
        Some("First words ".to_string())
    );
    assert!(h.active.is_empty());
    assert!(!h.generator.cancel(h.bible.id));
}

#[tokio::test]
async fn second_generation_in_same_project_is_rejected() {
    let llm = ScriptedLlm::new().stream_then_stall(&["Slow "]);
    let h = Harness::new(&["A"], llm);

    let mut first = h.generator.spawn(h.request(0, GenerationKind::ChapterNormal));
    while let Some(event) = first.events.recv().await {
        if matches!(event, GenerationEvent::Fragment { .. }) {
            break;
        }
    }

    let err = h
        .generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::Sequence(SequenceError::GenerationInProgress { .. })
    ));
    assert_eq!(h.credits.balance(h.user), 95);

    first.cancel();
    assert!(matches!(
        first.outcome().await.unwrap_err(),
        GenerationError::Cancelled
    ));
}

#[tokio::test]
async fn dropped_event_receiver_cancels_generation() {
    let llm = ScriptedLlm::new().stream_then_stall(&["Lonely "]);
    let h = Harness::new(&["A"], llm);

    let mut handle = h.generator.spawn(h.request(0, GenerationKind::ChapterNormal));
    while let Some(event) = handle.events.recv().await {
        if matches!(event, GenerationEvent::Fragment { .. }) {
            break;
        }
    }
    let (_, closed) = mpsc::channel(1);
    drop(std::mem::replace(&mut handle.events, closed));

    let err = handle.outcome().await.unwrap_err();

    assert!(matches!(err, GenerationError::Cancelled));
    assert!(h.active.is_empty());
}

#[tokio::test]
async fn drafts_are_persisted_while_streaming() {
    let llm = ScriptedLlm::new()
        .stream(&["One ", "two ", "three."])
        .reply(analysis_json("the mill race", &[]));
    let h = Harness::new(&["A"], llm);

    h.generator
        .spawn(h.request(0, GenerationKind::ChapterNormal))
        .outcome()
        .await
        .expect("chapter");

    let drafts: Vec<String> = h.chapters.draft_writes().into_iter().map(|s| s.draft).collect();
    assert_eq!(drafts[..3], ["One ", "One two ", "One two three."]);
}

#[tokio::test]
async fn unknown_project_is_reported() {
    let h = Harness::new(&["A"], ScriptedLlm::new());
    let mut request = h.request(0, GenerationKind::ChapterNormal);
    request.project_id = folio_domain::ProjectId::new();

    let err = h.generator.spawn(request).outcome().await.unwrap_err();

    assert!(matches!(err, GenerationError::ProjectNotFound(_)));
}

#[tokio::test]
async fn setup_kinds_are_not_chapter_generations() {
    let h = Harness::new(&["A"], ScriptedLlm::new());

    let err = h
        .generator
        .spawn(h.request(0, GenerationKind::SinglePageSetup))
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Precondition(_)));
    assert_eq!(h.credits.balance(h.user), 100);
}
