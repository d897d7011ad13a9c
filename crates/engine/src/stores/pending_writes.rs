//! Coalescing queue of draft snapshots awaiting persistence.
//!
//! Streaming produces many small updates to the same chapter; only the latest
//! snapshot per `(project, outline)` matters. A flush writes each queued entry
//! and puts failures back unless a newer snapshot arrived meanwhile, which gives
//! at-least-once delivery of the latest draft.

use std::collections::HashMap;

use folio_domain::{ChapterId, OutlineId, ProjectId};
use tokio::sync::Mutex;

use crate::infrastructure::ports::{ChapterRepo, DraftSnapshot, RepoError};

type Key = (ProjectId, OutlineId);

#[derive(Debug, Default)]
pub struct PendingWriteQueue {
    entries: Mutex<HashMap<Key, Pending>>,
}

#[derive(Debug, Clone)]
struct Pending {
    snapshot: DraftSnapshot,
    attempts: u32,
}

/// Outcome of one flush.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Persisted ids keyed by outline entry.
    pub written: Vec<(OutlineId, ChapterId)>,
    pub failed: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn chapter_id_for(&self, outline_id: OutlineId) -> Option<ChapterId> {
        self.written
            .iter()
            .find(|(id, _)| *id == outline_id)
            .map(|(_, chapter_id)| *chapter_id)
    }
}

impl PendingWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a snapshot, replacing any older one for the same chapter.
    pub async fn enqueue(&self, project_id: ProjectId, snapshot: DraftSnapshot) {
        let key = (project_id, snapshot.outline_id);
        let mut entries = self.entries.lock().await;
        let attempts = entries.get(&key).map(|p| p.attempts).unwrap_or(0);
        entries.insert(key, Pending { snapshot, attempts });
    }

    /// Drop whatever is queued for a chapter, e.g. right before it is committed.
    pub async fn discard(&self, project_id: ProjectId, outline_id: OutlineId) -> bool {
        self.entries
            .lock()
            .await
            .remove(&(project_id, outline_id))
            .is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Flush the entry for one chapter.
    pub async fn flush_one(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
        repo: &dyn ChapterRepo,
    ) -> FlushReport {
        let taken = {
            let mut entries = self.entries.lock().await;
            entries
                .remove(&(project_id, outline_id))
                .map(|pending| vec![((project_id, outline_id), pending)])
                .unwrap_or_default()
        };
        self.write_all(taken, repo).await
    }

    /// Flush every queued entry.
    pub async fn flush_all(&self, repo: &dyn ChapterRepo) -> FlushReport {
        let taken: Vec<_> = self.entries.lock().await.drain().collect();
        self.write_all(taken, repo).await
    }

    async fn write_all(&self, taken: Vec<(Key, Pending)>, repo: &dyn ChapterRepo) -> FlushReport {
        let mut report = FlushReport::default();

        for ((project_id, outline_id), pending) in taken {
            match repo.save_draft(project_id, &pending.snapshot).await {
                Ok(chapter_id) => report.written.push((outline_id, chapter_id)),
                Err(error) => {
                    report.failed += 1;
                    self.requeue(project_id, pending, &error).await;
                }
            }
        }

        report
    }

    async fn requeue(&self, project_id: ProjectId, mut pending: Pending, error: &RepoError) {
        pending.attempts += 1;
        tracing::warn!(
            project_id = %project_id,
            outline_id = %pending.snapshot.outline_id,
            attempts = pending.attempts,
            error = %error,
            "Draft write failed, keeping it queued"
        );

        let key = (project_id, pending.snapshot.outline_id);
        let mut entries = self.entries.lock().await;
        // A newer snapshot supersedes the failed one.
        entries.entry(key).or_insert(pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::MockChapterRepo;
    use chrono::Utc;
    use mockall::predicate::*;

    fn snapshot(outline_id: OutlineId, draft: &str) -> DraftSnapshot {
        DraftSnapshot {
            chapter_id: ChapterId::new(),
            outline_id,
            title: "T".into(),
            draft: draft.into(),
            complete: false,
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn latest_snapshot_wins() {
        let queue = PendingWriteQueue::new();
        let project = ProjectId::new();
        let outline = OutlineId::new();
        queue.enqueue(project, snapshot(outline, "a")).await;
        queue.enqueue(project, snapshot(outline, "ab")).await;
        assert_eq!(queue.len().await, 1);

        let mut repo = MockChapterRepo::new();
        repo.expect_save_draft()
            .withf(|_, snap| snap.draft == "ab")
            .times(1)
            .returning(|_, snap| Ok(snap.chapter_id));

        let report = queue.flush_all(&repo).await;

        assert!(report.is_clean());
        assert_eq!(report.written.len(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn failed_write_is_requeued() {
        let queue = PendingWriteQueue::new();
        let project = ProjectId::new();
        let outline = OutlineId::new();
        queue.enqueue(project, snapshot(outline, "text")).await;

        let mut failing = MockChapterRepo::new();
        failing
            .expect_save_draft()
            .returning(|_, _| Err(RepoError::database("save_draft", "locked")));
        let report = queue.flush_one(project, outline, &failing).await;
        assert_eq!(report.failed, 1);
        assert_eq!(queue.len().await, 1);

        let mut healthy = MockChapterRepo::new();
        healthy
            .expect_save_draft()
            .with(eq(project), always())
            .times(1)
            .returning(|_, snap| Ok(snap.chapter_id));
        let report = queue.flush_one(project, outline, &healthy).await;
        assert!(report.is_clean());
        assert!(report.chapter_id_for(outline).is_some());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn flush_one_leaves_other_chapters_queued() {
        let queue = PendingWriteQueue::new();
        let project = ProjectId::new();
        let mine = OutlineId::new();
        let other = OutlineId::new();
        queue.enqueue(project, snapshot(mine, "x")).await;
        queue.enqueue(ProjectId::new(), snapshot(other, "y")).await;

        let mut repo = MockChapterRepo::new();
        repo.expect_save_draft()
            .times(1)
            .returning(|_, snap| Ok(snap.chapter_id));

        queue.flush_one(project, mine, &repo).await;

        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn discard_drops_entry() {
        let queue = PendingWriteQueue::new();
        let project = ProjectId::new();
        let outline = OutlineId::new();
        queue.enqueue(project, snapshot(outline, "x")).await;

        assert!(queue.discard(project, outline).await);
        assert!(!queue.discard(project, outline).await);
        assert!(queue.is_empty().await);
    }
}
