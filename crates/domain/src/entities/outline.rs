//! OutlineEntry entity - A planned chapter slot

use serde::{Deserialize, Serialize};

use crate::OutlineId;

/// A planned chapter: title plus plot intent, before prose exists.
///
/// Its ordinal position is its index in the bible outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineEntry {
    pub id: OutlineId,
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

impl OutlineEntry {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: OutlineId::new(),
            title: title.into(),
            summary: summary.into(),
        }
    }

    pub fn with_id(mut self, id: OutlineId) -> Self {
        self.id = id;
        self
    }
}
