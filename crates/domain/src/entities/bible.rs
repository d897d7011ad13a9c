//! Bible entity - The story bible that owns a project's outline

use serde::{Deserialize, Serialize};

use super::outline::OutlineEntry;
use crate::{CharacterId, DomainError, OutlineId, ProjectId, UserId};

/// Word count target used when the bible does not specify one.
pub const DEFAULT_CHAPTER_WORD_COUNT: u32 = 1500;

/// Chapter count target used when the bible does not specify one.
pub const DEFAULT_CHAPTER_COUNT: u32 = 8;

/// Core concept of a story: premise, setting and tone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConcept {
    pub title: String,
    pub theme: String,
    pub logline: String,
    pub genre: String,
    pub setting_time: String,
    pub setting_place: String,
    pub setting_world: String,
    pub style_tone: String,
    pub target_chapter_count: Option<u32>,
    pub target_chapter_word_count: Option<u32>,
}

impl CoreConcept {
    /// The first required field that is blank, if any.
    ///
    /// Title, theme and genre must be present before any AI assistance
    /// that depends on the core concept is requested.
    pub fn first_missing_field(&self) -> Option<&'static str> {
        [
            ("core.title", &self.title),
            ("core.theme", &self.theme),
            ("core.genre", &self.genre),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    pub fn ensure_complete(&self) -> Result<(), DomainError> {
        match self.first_missing_field() {
            Some(field) => Err(DomainError::missing_field(field)),
            None => Ok(()),
        }
    }

    pub fn chapter_word_count(&self) -> u32 {
        self.target_chapter_word_count
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_CHAPTER_WORD_COUNT)
    }

    pub fn chapter_count(&self) -> u32 {
        self.target_chapter_count
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_CHAPTER_COUNT)
    }
}

/// Narrative role of a cast member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CharacterRole {
    Protagonist,
    Antagonist,
    #[default]
    #[serde(other)]
    Supporting,
}

/// A cast member described in the bible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub id: CharacterId,
    pub name: String,
    pub role: CharacterRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub motivation: String,
    #[serde(default)]
    pub arc_or_conflict: String,
}

impl CharacterProfile {
    pub fn new(name: impl Into<String>, role: CharacterRole) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            role,
            description: String::new(),
            background: String::new(),
            motivation: String::new(),
            arc_or_conflict: String::new(),
        }
    }
}

/// Style guide handed to the model with every chapter request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WritingInstructions {
    pub pov: String,
    pub pacing: String,
    pub dialogue_style: String,
    pub sensory_details: String,
    pub key_elements: String,
    pub avoid: String,
    pub custom_prompt_modifiers: Option<String>,
}

/// A project's story bible.
///
/// The outline order is the only ordering signal for chapters: position `i`
/// is the index into `outline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bible {
    pub id: ProjectId,
    pub owner: UserId,
    pub core: CoreConcept,
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    #[serde(default)]
    pub outline: Vec<OutlineEntry>,
    #[serde(default)]
    pub instructions: WritingInstructions,
}

impl Bible {
    pub fn new(owner: UserId, core: CoreConcept) -> Self {
        Self {
            id: ProjectId::new(),
            owner,
            core,
            characters: Vec::new(),
            outline: Vec::new(),
            instructions: WritingInstructions::default(),
        }
    }

    pub fn with_characters(mut self, characters: Vec<CharacterProfile>) -> Self {
        self.characters = characters;
        self
    }

    pub fn with_outline(mut self, outline: Vec<OutlineEntry>) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_instructions(mut self, instructions: WritingInstructions) -> Self {
        self.instructions = instructions;
        self
    }

    /// Outline position of an entry.
    pub fn position_of(&self, outline_id: OutlineId) -> Option<usize> {
        self.outline.iter().position(|entry| entry.id == outline_id)
    }

    pub fn outline_entry(&self, outline_id: OutlineId) -> Option<&OutlineEntry> {
        self.outline.iter().find(|entry| entry.id == outline_id)
    }

    /// Checks the minimum fields needed before a chapter can be requested.
    pub fn ensure_ready_for_chapter(&self, outline_id: OutlineId) -> Result<(), DomainError> {
        self.core.ensure_complete()?;
        let entry = self
            .outline_entry(outline_id)
            .ok_or_else(|| DomainError::not_found("OutlineEntry", outline_id.to_string()))?;
        if entry.title.trim().is_empty() {
            return Err(DomainError::missing_field("outline.title"));
        }
        Ok(())
    }

    /// Replaces the outline. Entries are immutable once generation starts,
    /// so callers only do this during setup.
    pub fn replace_outline(&mut self, outline: Vec<OutlineEntry>) {
        self.outline = outline;
    }

    /// Inserts or replaces an outline entry at the given position.
    ///
    /// A position past the end appends.
    pub fn upsert_outline_entry(&mut self, position: usize, entry: OutlineEntry) {
        if let Some(existing) = self.outline.iter().position(|e| e.id == entry.id) {
            self.outline.remove(existing);
        }
        let position = position.min(self.outline.len());
        self.outline.insert(position, entry);
    }
}
