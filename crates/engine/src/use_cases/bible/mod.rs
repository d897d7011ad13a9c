//! Story bible use cases: storage and AI-assisted setup.
//!
//! Every assisted action checks its preconditions before charging, and
//! persists nothing when the model reply cannot be used.

use std::sync::Arc;

use folio_domain::{
    Bible, CharacterProfile, CharacterRole, CoreConcept, DomainError, GenerationKind,
    OutlineEntry, ProjectId, UserId, WritingInstructions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::infrastructure::ports::{BibleRepo, ChapterRepo, LlmError, LlmPort, LlmRequest, RepoError};
use crate::infrastructure::structured_output::complete_json;
use crate::prompt_templates::{keys, PromptTemplates};
use crate::use_cases::credits::{Charge, ChargedFailure, CreditLedger, LedgerError, RefundPolicy};

const SETUP_TEMPERATURE: f32 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("Precondition failed: {0}")]
    Precondition(#[from] DomainError),
    #[error(transparent)]
    Credits(#[from] LedgerError),
    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Model returned no usable {0}")]
    EmptyResult(&'static str),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct AssistSettings {
    pub model: String,
    pub language: String,
    pub refund_policy: RefundPolicy,
}

// =============================================================================
// Model reply shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CharacterDraft {
    name: String,
    role: String,
    description: String,
    background: String,
    motivation: String,
    arc_or_conflict: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutlineDraft {
    title: String,
    summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullBibleDraft {
    core: CoreConcept,
    characters: Vec<CharacterDraft>,
    outline: Vec<OutlineDraft>,
    instructions: WritingInstructions,
}

/// Prompt view of a character, without its id.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CharacterView<'a> {
    name: &'a str,
    role: CharacterRole,
    description: &'a str,
    motivation: &'a str,
    arc_or_conflict: &'a str,
}

fn strip_title_marks(title: &str) -> String {
    title.replace(['《', '》'], "").trim().to_string()
}

fn normalize_role(role: &str) -> CharacterRole {
    let role = role.trim().to_lowercase();
    if role.starts_with("protagonist") || role.contains("主角") {
        CharacterRole::Protagonist
    } else if role.starts_with("antagonist") || role.contains("反派") {
        CharacterRole::Antagonist
    } else {
        CharacterRole::Supporting
    }
}

fn into_characters(drafts: Vec<CharacterDraft>) -> Vec<CharacterProfile> {
    drafts
        .into_iter()
        .filter(|draft| !draft.name.trim().is_empty())
        .map(|draft| CharacterProfile {
            description: draft.description,
            background: draft.background,
            motivation: draft.motivation,
            arc_or_conflict: draft.arc_or_conflict,
            ..CharacterProfile::new(draft.name.trim(), normalize_role(&draft.role))
        })
        .collect()
}

fn into_outline(drafts: Vec<OutlineDraft>) -> Vec<OutlineEntry> {
    drafts
        .into_iter()
        .filter(|draft| !draft.title.trim().is_empty())
        .map(|draft| OutlineEntry::new(draft.title.trim(), draft.summary))
        .collect()
}

/// Fill blank fields of `current` from `refined`; the title is always
/// cleaned of book-title marks.
fn merge_core(current: &CoreConcept, refined: CoreConcept) -> CoreConcept {
    let pick = |refined: String, current: &str| {
        if refined.trim().is_empty() {
            current.to_string()
        } else {
            refined
        }
    };
    CoreConcept {
        title: strip_title_marks(&pick(refined.title, &current.title)),
        theme: pick(refined.theme, &current.theme),
        logline: pick(refined.logline, &current.logline),
        genre: pick(refined.genre, &current.genre),
        setting_time: pick(refined.setting_time, &current.setting_time),
        setting_place: pick(refined.setting_place, &current.setting_place),
        setting_world: pick(refined.setting_world, &current.setting_world),
        style_tone: pick(refined.style_tone, &current.style_tone),
        target_chapter_count: current.target_chapter_count,
        target_chapter_word_count: current.target_chapter_word_count,
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, RepoError> {
    serde_json::to_string_pretty(value).map_err(RepoError::serialization)
}

// =============================================================================
// Use case
// =============================================================================

pub struct BibleAssistant {
    bibles: Arc<dyn BibleRepo>,
    chapters: Arc<dyn ChapterRepo>,
    llm: Arc<dyn LlmPort>,
    ledger: Arc<CreditLedger>,
    templates: Arc<PromptTemplates>,
    settings: AssistSettings,
}

impl BibleAssistant {
    pub fn new(
        bibles: Arc<dyn BibleRepo>,
        chapters: Arc<dyn ChapterRepo>,
        llm: Arc<dyn LlmPort>,
        ledger: Arc<CreditLedger>,
        templates: Arc<PromptTemplates>,
        settings: AssistSettings,
    ) -> Self {
        Self {
            bibles,
            chapters,
            llm,
            ledger,
            templates,
            settings,
        }
    }

    // -- storage ------------------------------------------------------------

    pub async fn create(&self, owner: UserId, core: CoreConcept) -> Result<Bible, AssistError> {
        let mut bible = Bible::new(owner, core);
        bible.core.title = strip_title_marks(&bible.core.title);
        self.bibles.save(&bible).await?;
        tracing::info!(project_id = %bible.id, owner = %owner, "Project created");
        Ok(bible)
    }

    pub async fn get(&self, project_id: ProjectId) -> Result<Bible, AssistError> {
        self.load(project_id).await
    }

    pub async fn list(&self, owner: UserId) -> Result<Vec<Bible>, AssistError> {
        Ok(self.bibles.list_for_owner(owner).await?)
    }

    /// Overwrite a bible. Outline entries that already have chapters must
    /// keep their ids and order.
    pub async fn save(&self, bible: Bible) -> Result<Bible, AssistError> {
        let existing = self.load(bible.id).await?;
        if existing.owner != bible.owner {
            return Err(DomainError::constraint("Project owner cannot change").into());
        }
        if existing.outline != bible.outline {
            self.ensure_outline_unlocked(bible.id).await?;
        }
        self.bibles.save(&bible).await?;
        Ok(bible)
    }

    // -- assisted setup -----------------------------------------------------

    /// Build a whole bible from a one-line idea.
    #[tracing::instrument(skip(self, idea))]
    pub async fn generate_full_bible(
        &self,
        owner: UserId,
        idea: &str,
        chapter_count: Option<u32>,
        word_count: Option<u32>,
    ) -> Result<Bible, AssistError> {
        if idea.trim().is_empty() {
            return Err(DomainError::missing_field("idea").into());
        }
        let targets = CoreConcept {
            target_chapter_count: chapter_count,
            target_chapter_word_count: word_count,
            ..CoreConcept::default()
        };
        let prompt = self.templates.render(
            keys::BIBLE_FULL,
            &[
                ("idea", idea.trim()),
                ("chapter_count", &targets.chapter_count().to_string()),
                ("word_count", &targets.chapter_word_count().to_string()),
                ("language", &self.settings.language),
            ],
        );

        let charge = self.ledger.charge(owner, GenerationKind::CompleteSetup).await?;
        let draft: FullBibleDraft = self.settle(&charge, self.ask(prompt).await).await?;

        let core = merge_core(&targets, draft.core);
        if core.title.is_empty() {
            return self.settle(&charge, Err(AssistError::EmptyResult("core concept"))).await;
        }
        let bible = Bible::new(owner, core)
            .with_characters(into_characters(draft.characters))
            .with_outline(into_outline(draft.outline))
            .with_instructions(draft.instructions);
        let bible = self.settle(&charge, self.persist(bible).await).await?;

        tracing::info!(
            project_id = %bible.id,
            characters = bible.characters.len(),
            chapters = bible.outline.len(),
            "Bible generated"
        );
        Ok(bible)
    }

    /// Refine a core concept. The result is returned, not stored.
    #[tracing::instrument(skip(self, partial))]
    pub async fn generate_core(
        &self,
        owner: UserId,
        partial: CoreConcept,
    ) -> Result<CoreConcept, AssistError> {
        let prompt = self.templates.render(
            keys::BIBLE_CORE,
            &[
                ("current_json", &to_json(&partial)?),
                ("language", &self.settings.language),
            ],
        );

        let charge = self.ledger.charge(owner, GenerationKind::SinglePageSetup).await?;
        let refined: CoreConcept = self.settle(&charge, self.ask(prompt).await).await?;
        let core = merge_core(&partial, refined);
        if core.first_missing_field().is_some() {
            return self.settle(&charge, Err(AssistError::EmptyResult("core concept"))).await;
        }
        Ok(core)
    }

    #[tracing::instrument(skip(self))]
    pub async fn generate_characters(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<CharacterProfile>, AssistError> {
        let mut bible = self.load(project_id).await?;
        bible.core.ensure_complete()?;
        let prompt = self.templates.render(
            keys::BIBLE_CHARACTERS,
            &[
                ("core_json", &to_json(&bible.core)?),
                ("characters_json", &to_json(&character_views(&bible))?),
                ("language", &self.settings.language),
            ],
        );

        let charge = self.ledger.charge(bible.owner, GenerationKind::SinglePageSetup).await?;
        let drafts: Vec<CharacterDraft> = self.settle(&charge, self.ask(prompt).await).await?;
        let characters = into_characters(drafts);
        if characters.is_empty() {
            return self.settle(&charge, Err(AssistError::EmptyResult("characters"))).await;
        }

        bible.characters = characters;
        let bible = self.settle(&charge, self.persist(bible).await).await?;
        Ok(bible.characters)
    }

    #[tracing::instrument(skip(self))]
    pub async fn generate_outline(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<OutlineEntry>, AssistError> {
        let mut bible = self.load(project_id).await?;
        bible.core.ensure_complete()?;
        if bible.characters.is_empty() {
            return Err(DomainError::missing_field("characters").into());
        }
        self.ensure_outline_unlocked(project_id).await?;
        let prompt = self.templates.render(
            keys::BIBLE_OUTLINE,
            &[
                ("core_json", &to_json(&bible.core)?),
                ("characters_json", &to_json(&character_views(&bible))?),
                ("chapter_count", &bible.core.chapter_count().to_string()),
                ("language", &self.settings.language),
            ],
        );

        let charge = self.ledger.charge(bible.owner, GenerationKind::SinglePageSetup).await?;
        let drafts: Vec<OutlineDraft> = self.settle(&charge, self.ask(prompt).await).await?;
        let outline = into_outline(drafts);
        if outline.is_empty() {
            return self.settle(&charge, Err(AssistError::EmptyResult("outline"))).await;
        }

        bible.replace_outline(outline);
        let bible = self.settle(&charge, self.persist(bible).await).await?;
        Ok(bible.outline)
    }

    #[tracing::instrument(skip(self))]
    pub async fn generate_instructions(
        &self,
        project_id: ProjectId,
    ) -> Result<WritingInstructions, AssistError> {
        let mut bible = self.load(project_id).await?;
        bible.core.ensure_complete()?;
        let cast = bible
            .characters
            .iter()
            .map(|c| format!("{}: {:?}", c.name, c.role))
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = self.templates.render(
            keys::BIBLE_INSTRUCTIONS,
            &[
                ("core_json", &to_json(&bible.core)?),
                ("cast", &cast),
                ("language", &self.settings.language),
            ],
        );

        let charge = self.ledger.charge(bible.owner, GenerationKind::SinglePageSetup).await?;
        let mut instructions: WritingInstructions =
            self.settle(&charge, self.ask(prompt).await).await?;
        instructions.custom_prompt_modifiers = bible.instructions.custom_prompt_modifiers.take();

        bible.instructions = instructions;
        let bible = self.settle(&charge, self.persist(bible).await).await?;
        Ok(bible.instructions)
    }

    // -- helpers ------------------------------------------------------------

    async fn load(&self, project_id: ProjectId) -> Result<Bible, AssistError> {
        self.bibles
            .load(project_id)
            .await?
            .ok_or(AssistError::ProjectNotFound(project_id))
    }

    async fn persist(&self, bible: Bible) -> Result<Bible, AssistError> {
        self.bibles.save(&bible).await?;
        Ok(bible)
    }

    async fn ensure_outline_unlocked(&self, project_id: ProjectId) -> Result<(), AssistError> {
        if self.chapters.list_for_project(project_id).await?.is_empty() {
            Ok(())
        } else {
            Err(DomainError::constraint("Outline is fixed once chapters have been written").into())
        }
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: String) -> Result<T, AssistError> {
        let request = LlmRequest::prompt(prompt)
            .with_model(&self.settings.model)
            .with_temperature(SETUP_TEMPERATURE);
        Ok(complete_json(self.llm.as_ref(), request).await?)
    }

    /// Pass a charged result through, refunding per policy on failure.
    async fn settle<T>(&self, charge: &Charge, result: Result<T, AssistError>) -> Result<T, AssistError> {
        if let Err(error) = &result {
            tracing::warn!(kind = %charge.kind, error = %error, "Assisted setup failed");
            self.ledger
                .settle_failure(charge, self.settings.refund_policy, ChargedFailure::Failed)
                .await;
        }
        result
    }
}

fn character_views(bible: &Bible) -> Vec<CharacterView<'_>> {
    bible
        .characters
        .iter()
        .map(|c| CharacterView {
            name: &c.name,
            role: c.role,
            description: &c.description,
            motivation: &c.motivation,
            arc_or_conflict: &c.arc_or_conflict,
        })
        .collect()
}
