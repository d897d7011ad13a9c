//! Manuscript aggregate - outline positions indexed to their chapters
//!
//! # Rustic DDD Design
//!
//! - **Private fields**: the position index is an invariant, so it is only
//!   rebuilt through `new()` / `replace_outline()`
//! - **Ordering**: outline position is the sole ordering signal; chapter titles
//!   are never parsed for chapter numbers
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use folio_domain::{Chapter, Manuscript, OutlineEntry};
//!
//! let first = OutlineEntry::new("Arrival", "The ferry docks");
//! let second = OutlineEntry::new("Departure", "The ferry leaves");
//! let chapter = Chapter::new(second.id, "Departure", Utc::now()).with_content("...");
//!
//! let manuscript = Manuscript::new(vec![first, second.clone()], vec![chapter]);
//! assert_eq!(manuscript.position_of(second.id), Some(1));
//! assert!(manuscript.chapter_at(0).is_none());
//! ```

use std::collections::HashMap;

use crate::{count_words, Chapter, OutlineEntry, OutlineId};

/// A chapter seen from the outline: its position and entry.
#[derive(Debug, Clone, Copy)]
pub struct Slot<'a> {
    pub position: usize,
    pub entry: &'a OutlineEntry,
    pub chapter: Option<&'a Chapter>,
}

/// Ordered index from outline position to chapter.
#[derive(Debug, Clone, Default)]
pub struct Manuscript {
    outline: Vec<OutlineEntry>,
    positions: HashMap<OutlineId, usize>,
    chapters: Vec<Option<Chapter>>,
    orphans: Vec<Chapter>,
}

impl Manuscript {
    /// Index chapters by outline position.
    ///
    /// Chapters whose outline entry no longer exists are kept aside as
    /// orphans. If two chapters claim the same entry, the most recently
    /// updated one wins and the other becomes an orphan.
    pub fn new(outline: Vec<OutlineEntry>, chapters: impl IntoIterator<Item = Chapter>) -> Self {
        let positions: HashMap<OutlineId, usize> = outline
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.id, position))
            .collect();
        let mut indexed: Vec<Option<Chapter>> = vec![None; outline.len()];
        let mut orphans = Vec::new();

        for chapter in chapters {
            match positions.get(&chapter.outline_id) {
                Some(&position) => match indexed[position].take() {
                    Some(existing) if existing.updated_at > chapter.updated_at => {
                        orphans.push(chapter);
                        indexed[position] = Some(existing);
                    }
                    Some(existing) => {
                        orphans.push(existing);
                        indexed[position] = Some(chapter);
                    }
                    None => indexed[position] = Some(chapter),
                },
                None => orphans.push(chapter),
            }
        }

        Self {
            outline,
            positions,
            chapters: indexed,
            orphans,
        }
    }

    /// Rebuild the index for a new outline, keeping every chapter whose
    /// entry survives.
    pub fn replace_outline(&mut self, outline: Vec<OutlineEntry>) {
        let chapters: Vec<Chapter> = std::mem::take(&mut self.chapters)
            .into_iter()
            .flatten()
            .chain(std::mem::take(&mut self.orphans))
            .collect();
        *self = Self::new(outline, chapters);
    }

    pub fn len(&self) -> usize {
        self.outline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outline.is_empty()
    }

    pub fn outline(&self) -> &[OutlineEntry] {
        &self.outline
    }

    pub fn orphans(&self) -> &[Chapter] {
        &self.orphans
    }

    pub fn position_of(&self, outline_id: OutlineId) -> Option<usize> {
        self.positions.get(&outline_id).copied()
    }

    pub fn entry_at(&self, position: usize) -> Option<&OutlineEntry> {
        self.outline.get(position)
    }

    pub fn chapter_at(&self, position: usize) -> Option<&Chapter> {
        self.chapters.get(position).and_then(Option::as_ref)
    }

    pub fn chapter_for(&self, outline_id: OutlineId) -> Option<&Chapter> {
        self.position_of(outline_id)
            .and_then(|position| self.chapter_at(position))
    }

    pub fn slot(&self, position: usize) -> Option<Slot<'_>> {
        self.entry_at(position).map(|entry| Slot {
            position,
            entry,
            chapter: self.chapter_at(position),
        })
    }

    pub fn slots(&self) -> impl Iterator<Item = Slot<'_>> {
        (0..self.len()).filter_map(move |position| self.slot(position))
    }

    /// Whether the chapter at `position` carries a continuity record.
    pub fn is_done(&self, position: usize) -> bool {
        self.chapter_at(position)
            .map(Chapter::is_complete)
            .unwrap_or(false)
    }

    /// Chapters before `position` with committed prose, in outline order.
    pub fn prior_chapters(&self, position: usize) -> Vec<(usize, &Chapter)> {
        self.chapters
            .iter()
            .take(position)
            .enumerate()
            .filter_map(|(position, chapter)| chapter.as_ref().map(|c| (position, c)))
            .filter(|(_, chapter)| chapter.has_content())
            .collect()
    }

    /// Committed chapters in outline order.
    pub fn committed_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters
            .iter()
            .flatten()
            .filter(|chapter| chapter.has_content())
    }

    pub fn total_word_count(&self) -> usize {
        self.committed_chapters()
            .map(|chapter| count_words(&chapter.content))
            .sum()
    }

    pub fn completed_count(&self) -> usize {
        (0..self.len()).filter(|p| self.is_done(*p)).count()
    }
}
