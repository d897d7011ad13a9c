//! Repository port traits for persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_domain::{
    Bible, Chapter, ChapterId, ContinuityRecord, OutlineEntry, OutlineId, ProjectId, UserId,
};

use super::error::RepoError;

// =============================================================================
// Story bibles
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BibleRepo: Send + Sync {
    async fn load(&self, id: ProjectId) -> Result<Option<Bible>, RepoError>;
    async fn save(&self, bible: &Bible) -> Result<(), RepoError>;
    /// Insert or replace the outline entry at `position`, leaving the rest of
    /// the bible untouched. `position == outline.len()` appends.
    async fn save_outline_entry(
        &self,
        id: ProjectId,
        position: usize,
        entry: &OutlineEntry,
    ) -> Result<(), RepoError>;
    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Bible>, RepoError>;
}

// =============================================================================
// Chapters
// =============================================================================

/// Uncommitted prose for one outline entry, as queued by the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSnapshot {
    pub chapter_id: ChapterId,
    pub outline_id: OutlineId,
    pub title: String,
    pub draft: String,
    /// The stream behind `draft` has ended normally.
    pub complete: bool,
    pub taken_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChapterRepo: Send + Sync {
    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Chapter>, RepoError>;
    async fn get_by_outline(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
    ) -> Result<Option<Chapter>, RepoError>;
    /// Upsert keyed by `(project, chapter.outline_id)`. An existing row keeps
    /// its id, which is returned.
    async fn save(&self, project_id: ProjectId, chapter: &Chapter) -> Result<ChapterId, RepoError>;
    /// Write only the draft buffer, creating the chapter row if needed.
    /// Committed content and continuity are never touched.
    async fn save_draft(
        &self,
        project_id: ProjectId,
        snapshot: &DraftSnapshot,
    ) -> Result<ChapterId, RepoError>;
    async fn save_continuity(
        &self,
        chapter_id: ChapterId,
        record: Option<ContinuityRecord>,
    ) -> Result<(), RepoError>;
}

// =============================================================================
// Credits
// =============================================================================

/// Result of a conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Applied { balance: u64 },
    Insufficient { balance: u64 },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditRepo: Send + Sync {
    /// `None` when the user has no account yet.
    async fn get_balance(&self, user: UserId) -> Result<Option<u64>, RepoError>;
    /// Atomically subtract `amount` if and only if the balance covers it.
    /// A missing account is treated as a zero balance.
    async fn debit(&self, user: UserId, amount: u64) -> Result<DebitOutcome, RepoError>;
    /// Unconditionally add `amount`, opening the account at zero if needed.
    async fn credit(&self, user: UserId, amount: u64) -> Result<u64, RepoError>;
    /// Create the account with `initial` credits unless it already exists.
    /// Returns the balance after the call.
    async fn open_account(&self, user: UserId, initial: u64) -> Result<u64, RepoError>;
}
