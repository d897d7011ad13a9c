//! Sequence queries: which chapters may be written, and what they would be told.
//!
//! Lock state is computed from persisted chapters plus the in-flight
//! generation every time it is asked for; nothing here is cached.

use std::sync::Arc;

use folio_domain::{
    Bible, Manuscript, OutlineId, ProjectId, SequenceError, SequenceGate, SlotState,
};
use serde::Serialize;

use crate::infrastructure::ports::{BibleRepo, ChapterRepo, RepoError};
use crate::stores::ActiveGenerationStore;
use crate::use_cases::continuity::ContextAssembler;

#[derive(Debug, thiserror::Error)]
pub enum SequenceQueryError {
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A bible together with its chapters indexed by outline position.
#[derive(Debug, Clone)]
pub struct Project {
    pub bible: Bible,
    pub manuscript: Manuscript,
}

/// Load a project's bible and chapters. `None` if the bible does not exist.
pub async fn load_project(
    bibles: &dyn BibleRepo,
    chapters: &dyn ChapterRepo,
    project_id: ProjectId,
) -> Result<Option<Project>, RepoError> {
    let Some(bible) = bibles.load(project_id).await? else {
        return Ok(None);
    };
    let chapters = chapters.list_for_project(project_id).await?;
    let manuscript = Manuscript::new(bible.outline.clone(), chapters);
    if !manuscript.orphans().is_empty() {
        tracing::debug!(
            project_id = %project_id,
            orphans = manuscript.orphans().len(),
            "Chapters without an outline entry are ignored"
        );
    }
    Ok(Some(Project { bible, manuscript }))
}

/// One outline position as shown to a caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub position: usize,
    pub outline_id: OutlineId,
    pub title: String,
    #[serde(flatten)]
    pub state: SlotState,
    pub word_count: usize,
    pub has_draft: bool,
}

pub struct SequenceQueries {
    bibles: Arc<dyn BibleRepo>,
    chapters: Arc<dyn ChapterRepo>,
    active: ActiveGenerationStore,
    assembler: ContextAssembler,
}

impl SequenceQueries {
    pub fn new(
        bibles: Arc<dyn BibleRepo>,
        chapters: Arc<dyn ChapterRepo>,
        active: ActiveGenerationStore,
    ) -> Self {
        Self {
            bibles,
            chapters,
            active,
            assembler: ContextAssembler::new(),
        }
    }

    async fn project(&self, project_id: ProjectId) -> Result<Project, SequenceQueryError> {
        load_project(self.bibles.as_ref(), self.chapters.as_ref(), project_id)
            .await?
            .ok_or(SequenceQueryError::ProjectNotFound(project_id))
    }

    /// `Ok` if a generation for `outline_id` could start right now.
    pub async fn can_generate(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
    ) -> Result<(), SequenceQueryError> {
        let project = self.project(project_id).await?;
        let active = self.active.get(project_id);
        SequenceGate::new(&project.manuscript, active.as_ref()).check_start(outline_id)?;
        Ok(())
    }

    pub async fn slot_states(&self, project_id: ProjectId) -> Result<Vec<SlotView>, SequenceQueryError> {
        let project = self.project(project_id).await?;
        let active = self.active.get(project_id);
        let gate = SequenceGate::new(&project.manuscript, active.as_ref());

        Ok(project
            .manuscript
            .slots()
            .filter_map(|slot| {
                let state = gate.state_at(slot.position)?;
                Some(SlotView {
                    position: slot.position,
                    outline_id: slot.entry.id,
                    title: slot.entry.title.clone(),
                    state,
                    word_count: slot.chapter.map(|c| c.word_count).unwrap_or(0),
                    has_draft: slot.chapter.and_then(|c| c.pending_prose()).is_some(),
                })
            })
            .collect())
    }

    /// The briefing a generation for `outline_id` would receive.
    pub async fn get_context(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
        rewrite_instructions: Option<&str>,
    ) -> Result<String, SequenceQueryError> {
        let project = self.project(project_id).await?;
        let position = project
            .manuscript
            .position_of(outline_id)
            .ok_or(SequenceError::UnknownEntry(outline_id))?;
        Ok(self
            .assembler
            .assemble(&project.manuscript, position, rewrite_instructions))
    }
}
