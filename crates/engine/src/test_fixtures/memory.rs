//! In-memory adapters for the repository ports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use folio_domain::{
    Bible, Chapter, ChapterId, ContinuityRecord, OutlineEntry, OutlineId, ProjectId, UserId,
};

use crate::infrastructure::ports::{
    BibleRepo, ChapterRepo, CreditRepo, DebitOutcome, DraftSnapshot, RepoError,
};

#[derive(Default)]
pub struct InMemoryBibleRepo {
    bibles: Mutex<HashMap<ProjectId, Bible>>,
}

impl InMemoryBibleRepo {
    pub fn with(bible: Bible) -> Self {
        let repo = Self::default();
        repo.bibles.lock().expect("bibles").insert(bible.id, bible);
        repo
    }

    pub fn get(&self, id: ProjectId) -> Option<Bible> {
        self.bibles.lock().expect("bibles").get(&id).cloned()
    }
}

#[async_trait]
impl BibleRepo for InMemoryBibleRepo {
    async fn load(&self, id: ProjectId) -> Result<Option<Bible>, RepoError> {
        Ok(self.get(id))
    }

    async fn save(&self, bible: &Bible) -> Result<(), RepoError> {
        self.bibles.lock().expect("bibles").insert(bible.id, bible.clone());
        Ok(())
    }

    async fn save_outline_entry(
        &self,
        id: ProjectId,
        position: usize,
        entry: &OutlineEntry,
    ) -> Result<(), RepoError> {
        let mut bibles = self.bibles.lock().expect("bibles");
        let bible = bibles
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found("Bible", id))?;
        bible.upsert_outline_entry(position, entry.clone());
        Ok(())
    }

    async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Bible>, RepoError> {
        Ok(self
            .bibles
            .lock()
            .expect("bibles")
            .values()
            .filter(|bible| bible.owner == owner)
            .cloned()
            .collect())
    }
}

/// Chapters keyed by `(project, outline)`, with switches to make writes fail.
#[derive(Default)]
pub struct InMemoryChapterRepo {
    chapters: Mutex<HashMap<(ProjectId, OutlineId), Chapter>>,
    draft_writes: Mutex<Vec<DraftSnapshot>>,
    fail_saves: AtomicBool,
    fail_drafts: AtomicBool,
}

impl InMemoryChapterRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_id: ProjectId, chapter: Chapter) {
        self.chapters
            .lock()
            .expect("chapters")
            .insert((project_id, chapter.outline_id), chapter);
    }

    pub fn chapter(&self, project_id: ProjectId, outline_id: OutlineId) -> Option<Chapter> {
        self.chapters
            .lock()
            .expect("chapters")
            .get(&(project_id, outline_id))
            .cloned()
    }

    pub fn draft_writes(&self) -> Vec<DraftSnapshot> {
        self.draft_writes.lock().expect("draft writes").clone()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_drafts(&self, fail: bool) {
        self.fail_drafts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChapterRepo for InMemoryChapterRepo {
    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Chapter>, RepoError> {
        Ok(self
            .chapters
            .lock()
            .expect("chapters")
            .iter()
            .filter(|((project, _), _)| *project == project_id)
            .map(|(_, chapter)| chapter.clone())
            .collect())
    }

    async fn get_by_outline(
        &self,
        project_id: ProjectId,
        outline_id: OutlineId,
    ) -> Result<Option<Chapter>, RepoError> {
        Ok(self.chapter(project_id, outline_id))
    }

    async fn save(&self, project_id: ProjectId, chapter: &Chapter) -> Result<ChapterId, RepoError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepoError::database("save_chapter", "disk full"));
        }
        let mut chapters = self.chapters.lock().expect("chapters");
        let key = (project_id, chapter.outline_id);
        let id = chapters.get(&key).map(|existing| existing.id).unwrap_or(chapter.id);
        chapters.insert(key, chapter.clone().with_id(id));
        Ok(id)
    }

    async fn save_draft(
        &self,
        project_id: ProjectId,
        snapshot: &DraftSnapshot,
    ) -> Result<ChapterId, RepoError> {
        if self.fail_drafts.load(Ordering::SeqCst) {
            return Err(RepoError::database("save_draft", "database is locked"));
        }
        self.draft_writes.lock().expect("draft writes").push(snapshot.clone());

        let mut chapters = self.chapters.lock().expect("chapters");
        let chapter = chapters
            .entry((project_id, snapshot.outline_id))
            .or_insert_with(|| {
                Chapter::new(snapshot.outline_id, snapshot.title.clone(), snapshot.taken_at)
                    .with_id(snapshot.chapter_id)
            });
        chapter.title = snapshot.title.clone();
        chapter.draft = Some(snapshot.draft.clone());
        chapter.draft_complete = snapshot.complete;
        chapter.updated_at = snapshot.taken_at;
        Ok(chapter.id)
    }

    async fn save_continuity(
        &self,
        chapter_id: ChapterId,
        record: Option<ContinuityRecord>,
    ) -> Result<(), RepoError> {
        let mut chapters = self.chapters.lock().expect("chapters");
        let chapter = chapters
            .values_mut()
            .find(|chapter| chapter.id == chapter_id)
            .ok_or_else(|| RepoError::not_found("Chapter", chapter_id))?;
        chapter.continuity = record;
        Ok(())
    }
}

/// Balances behind one mutex, so debits are serialized like the SQL adapter's.
#[derive(Default)]
pub struct InMemoryCreditRepo {
    balances: Mutex<HashMap<UserId, u64>>,
}

impl InMemoryCreditRepo {
    pub fn with_balance(user: UserId, balance: u64) -> Self {
        let repo = Self::default();
        repo.balances.lock().expect("balances").insert(user, balance);
        repo
    }

    pub fn balance(&self, user: UserId) -> u64 {
        self.balances
            .lock()
            .expect("balances")
            .get(&user)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CreditRepo for InMemoryCreditRepo {
    async fn get_balance(&self, user: UserId) -> Result<Option<u64>, RepoError> {
        Ok(self.balances.lock().expect("balances").get(&user).copied())
    }

    async fn debit(&self, user: UserId, amount: u64) -> Result<DebitOutcome, RepoError> {
        let mut balances = self.balances.lock().expect("balances");
        let balance = balances.get(&user).copied().unwrap_or(0);
        if balance < amount {
            return Ok(DebitOutcome::Insufficient { balance });
        }
        let balance = balance - amount;
        balances.insert(user, balance);
        Ok(DebitOutcome::Applied { balance })
    }

    async fn credit(&self, user: UserId, amount: u64) -> Result<u64, RepoError> {
        let mut balances = self.balances.lock().expect("balances");
        let balance = balances.entry(user).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| RepoError::constraint("balance overflow"))?;
        Ok(*balance)
    }

    async fn open_account(&self, user: UserId, initial: u64) -> Result<u64, RepoError> {
        Ok(*self
            .balances
            .lock()
            .expect("balances")
            .entry(user)
            .or_insert(initial))
    }
}
