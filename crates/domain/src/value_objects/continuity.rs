//! Continuity record - structured facts extracted from a finished chapter
//!
//! A record is the only thing the next chapter's briefing trusts about its
//! predecessor. Construction validates the fields the briefing depends on so
//! that a malformed analysis can never be attached to a chapter.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Ending locations too vague to anchor the next chapter's opening.
const VAGUE_LOCATIONS: &[&str] = &[
    "outside", "inside", "unknown", "somewhere", "anywhere", "elsewhere", "n/a", "na", "none",
    "nowhere", "tbd", "未知", "某处", "外面",
];

/// Facts about a finished chapter used to brief the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityRecord {
    /// Short prose summary (roughly 50-100 words)
    pub summary: String,
    /// Major events in the order they happened
    pub key_events: Vec<String>,
    /// Objects acquired, lost or used
    pub items: Vec<String>,
    /// Precise location where the chapter ends
    pub location: String,
    /// Characters who were active in the chapter
    pub characters: Vec<String>,
}

impl ContinuityRecord {
    /// Build a validated record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the summary is blank or the
    /// location is blank or too vague to serve as a starting point.
    pub fn new(
        summary: impl Into<String>,
        key_events: Vec<String>,
        items: Vec<String>,
        location: impl Into<String>,
        characters: Vec<String>,
    ) -> Result<Self, DomainError> {
        let summary = summary.into().trim().to_string();
        if summary.is_empty() {
            return Err(DomainError::validation("Continuity summary cannot be empty"));
        }

        let location = location.into().trim().to_string();
        if location.is_empty() {
            return Err(DomainError::validation("Ending location cannot be empty"));
        }
        if is_vague_location(&location) {
            return Err(DomainError::validation(format!(
                "Ending location '{}' is too vague to continue from",
                location
            )));
        }

        Ok(Self {
            summary,
            key_events: clean_list(key_events),
            items: clean_list(items),
            location,
            characters: clean_list(characters),
        })
    }

    /// Items joined for the inventory line, or "None".
    pub fn inventory_line(&self) -> String {
        if self.items.is_empty() {
            "None".to_string()
        } else {
            self.items.join(", ")
        }
    }
}

fn is_vague_location(location: &str) -> bool {
    let normalized = location
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    VAGUE_LOCATIONS.contains(&normalized.as_str())
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
