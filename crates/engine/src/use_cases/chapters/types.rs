//! Requests, events and errors of chapter generation.

use folio_domain::{
    Chapter, ContinuityRecord, DomainError, GenerationKind, OutlineId, ProjectId, SequenceError,
    UserId,
};
use serde::{Deserialize, Serialize};

use crate::infrastructure::ports::{LlmError, RepoError};
use crate::use_cases::continuity::ExtractionError;
use crate::use_cases::credits::{ChargedFailure, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateChapter {
    pub project_id: ProjectId,
    pub outline_id: OutlineId,
    /// Account charged for the generation.
    pub user_id: UserId,
    pub kind: GenerationKind,
    pub rewrite_instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Validating,
    ContextBuilt,
    Streaming,
    Analyzing,
    Persisted,
}

/// Progress reported while a generation runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    Stage {
        stage: GenerationStage,
    },
    Fragment {
        text: String,
        /// Draft length so far.
        #[serde(rename = "wordCount")]
        word_count: usize,
    },
    Completed {
        #[serde(rename = "outlineId")]
        outline_id: OutlineId,
        #[serde(rename = "wordCount")]
        word_count: usize,
        record: ContinuityRecord,
    },
    Failed {
        stage: GenerationStage,
        message: String,
        refunded: bool,
    },
}

/// A chapter committed with its continuity record.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedChapter {
    pub chapter: Chapter,
    pub credits_spent: u64,
    /// Balance after the charge; `None` when nothing was charged.
    pub balance_after: Option<u64>,
}

impl GeneratedChapter {
    pub fn record(&self) -> Option<&ContinuityRecord> {
        self.chapter.continuity.as_ref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error("Precondition failed: {0}")]
    Precondition(#[from] DomainError),
    #[error(transparent)]
    Credits(#[from] LedgerError),
    #[error("Generation stream failed: {0}")]
    Stream(LlmError),
    #[error("Continuity extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Generation cancelled")]
    Cancelled,
    #[error("Chapter {0} has no prose to analyze")]
    NothingToAnalyze(OutlineId),
    #[error("Chapter {0} only has an interrupted draft; generate it again")]
    PartialDraft(OutlineId),
    #[error("Generation task aborted: {0}")]
    TaskAborted(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl GenerationError {
    pub(crate) fn charged_failure(&self) -> ChargedFailure {
        match self {
            Self::Cancelled => ChargedFailure::Cancelled,
            _ => ChargedFailure::Failed,
        }
    }
}
