//! Manuscript export.

use std::sync::Arc;

use folio_domain::{Manuscript, ProjectId};
use serde::Serialize;

use crate::infrastructure::ports::{BibleRepo, ChapterRepo, RepoError};
use crate::use_cases::sequence::load_project;

const CHAPTER_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManuscriptExport {
    pub title: String,
    pub markdown: String,
    pub chapter_count: usize,
    pub total_word_count: usize,
}

/// Committed chapters as Markdown, in outline order. Drafts are left out.
pub fn render_markdown(manuscript: &Manuscript) -> String {
    manuscript
        .committed_chapters()
        .map(|chapter| format!("# {}\n\n{}", chapter.title, chapter.content.trim_end()))
        .collect::<Vec<_>>()
        .join(CHAPTER_SEPARATOR)
}

pub struct ExportManuscript {
    bibles: Arc<dyn BibleRepo>,
    chapters: Arc<dyn ChapterRepo>,
}

impl ExportManuscript {
    pub fn new(bibles: Arc<dyn BibleRepo>, chapters: Arc<dyn ChapterRepo>) -> Self {
        Self { bibles, chapters }
    }

    pub async fn execute(&self, project_id: ProjectId) -> Result<ManuscriptExport, ExportError> {
        let project = load_project(self.bibles.as_ref(), self.chapters.as_ref(), project_id)
            .await?
            .ok_or(ExportError::ProjectNotFound(project_id))?;
        let manuscript = &project.manuscript;

        Ok(ManuscriptExport {
            title: project.bible.core.title.clone(),
            markdown: render_markdown(manuscript),
            chapter_count: manuscript.committed_chapters().count(),
            total_word_count: manuscript.total_word_count(),
        })
    }
}
