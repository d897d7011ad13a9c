//! Chapter entity - Prose written for one outline entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::ContinuityRecord;
use crate::{ChapterId, OutlineId};

/// Counts the non-whitespace characters of a text.
///
/// This is the word count used throughout the product; it treats CJK prose
/// and space-separated prose alike.
pub fn count_words(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// A chapter owned 1:1 by an outline entry.
///
/// `content` is the committed prose. `draft` holds prose that has been
/// streamed but not committed yet (in flight, interrupted, or awaiting a
/// successful continuity analysis). A chapter is complete only once it
/// carries a continuity record.
///
/// Only a finished draft may ever be analyzed and committed. An interrupted
/// stream leaves a partial draft that stays uncommitted until the chapter is
/// generated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: ChapterId,
    pub outline_id: OutlineId,
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub continuity: Option<ContinuityRecord>,
    pub draft: Option<String>,
    /// The stream that produced `draft` ended normally.
    #[serde(default)]
    pub draft_complete: bool,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    /// Create an empty chapter for an outline entry.
    pub fn new(outline_id: OutlineId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ChapterId::new(),
            outline_id,
            title: title.into(),
            content: String::new(),
            word_count: 0,
            continuity: None,
            draft: None,
            draft_complete: false,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: ChapterId) -> Self {
        self.id = id;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self.word_count = count_words(&self.content);
        self
    }

    pub fn with_continuity(mut self, record: ContinuityRecord) -> Self {
        self.continuity = Some(record);
        self
    }

    /// Complete means analyzed: content alone is not enough.
    pub fn is_complete(&self) -> bool {
        self.continuity.is_some()
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Prose that is awaiting commit, if any.
    pub fn pending_prose(&self) -> Option<&str> {
        self.draft.as_deref().filter(|d| !d.trim().is_empty())
    }

    /// Finished prose that may be analyzed and committed.
    pub fn analyzable_prose(&self) -> Option<&str> {
        self.pending_prose().filter(|_| self.draft_complete)
    }

    /// A draft cut short by a failed or cancelled stream.
    pub fn has_partial_draft(&self) -> bool {
        self.pending_prose().is_some() && !self.draft_complete
    }

    /// Start a fresh draft buffer, leaving committed content untouched.
    pub fn begin_draft(&mut self, title: impl Into<String>, now: DateTime<Utc>) {
        self.title = title.into();
        self.draft = Some(String::new());
        self.draft_complete = false;
        self.updated_at = now;
    }

    /// Mark the draft as the model's whole answer.
    pub fn finish_draft(&mut self) {
        self.draft_complete = self.draft.is_some();
    }

    pub fn append_draft(&mut self, fragment: &str) {
        self.draft.get_or_insert_with(String::new).push_str(fragment);
    }

    pub fn draft_word_count(&self) -> usize {
        self.draft.as_deref().map(count_words).unwrap_or(0)
    }

    /// Drop the previous continuity record ahead of a re-analysis.
    pub fn discard_continuity(&mut self, now: DateTime<Utc>) -> Option<ContinuityRecord> {
        self.updated_at = now;
        self.continuity.take()
    }

    /// Replace content and record wholesale; clears the draft.
    pub fn commit(&mut self, prose: String, record: ContinuityRecord, now: DateTime<Utc>) {
        self.word_count = count_words(&prose);
        self.content = prose;
        self.continuity = Some(record);
        self.draft = None;
        self.draft_complete = false;
        self.updated_at = now;
    }
}
