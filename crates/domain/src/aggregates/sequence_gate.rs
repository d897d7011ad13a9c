//! Sequence gate - which outline positions may be generated right now
//!
//! Lock state is a pure function of persisted chapters plus the project's
//! single active generation. Nothing here is cached: callers evaluate a gate
//! over a freshly loaded [`Manuscript`] at request time.
//!
//! | State        | Meaning                                                 |
//! |--------------|---------------------------------------------------------|
//! | `Locked`     | predecessor is not done                                 |
//! | `Ready`      | may start generating                                    |
//! | `Generating` | prose is streaming                                      |
//! | `Analyzing`  | prose finished, continuity extraction running           |
//! | `Done`       | chapter has a continuity record (may be regenerated)    |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::manuscript::Manuscript;
use crate::OutlineId;

/// Phase of an in-flight generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Generating,
    Analyzing,
}

/// The one generation a project may have in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGeneration {
    pub outline_id: OutlineId,
    pub phase: GenerationPhase,
    pub started_at: DateTime<Utc>,
}

impl ActiveGeneration {
    pub fn new(outline_id: OutlineId, started_at: DateTime<Utc>) -> Self {
        Self {
            outline_id,
            phase: GenerationPhase::Generating,
            started_at,
        }
    }
}

/// Gate state of one outline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Locked {
        #[serde(rename = "blockedBy")]
        blocked_by: OutlineId,
    },
    Ready,
    Generating,
    Analyzing,
    Done,
}

impl SlotState {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Generating | Self::Analyzing)
    }
}

/// Why a generation may not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("Outline entry {0} is not part of this outline")]
    UnknownEntry(OutlineId),

    #[error("Chapter {outline_id} is locked until chapter {blocked_by} is complete")]
    SequenceViolation {
        outline_id: OutlineId,
        blocked_by: OutlineId,
    },

    #[error("Chapter {active} is already {phase:?}; one generation per project at a time")]
    GenerationInProgress {
        active: OutlineId,
        phase: GenerationPhase,
    },
}

/// Evaluates lock state over a manuscript snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SequenceGate<'a> {
    manuscript: &'a Manuscript,
    active: Option<&'a ActiveGeneration>,
}

impl<'a> SequenceGate<'a> {
    pub fn new(manuscript: &'a Manuscript, active: Option<&'a ActiveGeneration>) -> Self {
        Self { manuscript, active }
    }

    /// State from persisted data alone, ignoring any in-flight generation.
    fn persisted_state(&self, position: usize) -> Option<SlotState> {
        self.manuscript.entry_at(position)?;

        if self.manuscript.is_done(position) {
            return Some(SlotState::Done);
        }
        if position == 0 || self.manuscript.is_done(position - 1) {
            return Some(SlotState::Ready);
        }
        self.manuscript
            .entry_at(position - 1)
            .map(|predecessor| SlotState::Locked {
                blocked_by: predecessor.id,
            })
    }

    pub fn state_at(&self, position: usize) -> Option<SlotState> {
        let entry = self.manuscript.entry_at(position)?;
        match self.active {
            Some(active) if active.outline_id == entry.id => Some(match active.phase {
                GenerationPhase::Generating => SlotState::Generating,
                GenerationPhase::Analyzing => SlotState::Analyzing,
            }),
            _ => self.persisted_state(position),
        }
    }

    pub fn state_of(&self, outline_id: OutlineId) -> Result<SlotState, SequenceError> {
        self.manuscript
            .position_of(outline_id)
            .and_then(|position| self.state_at(position))
            .ok_or(SequenceError::UnknownEntry(outline_id))
    }

    /// States of every position, in outline order.
    pub fn states(&self) -> Vec<(OutlineId, SlotState)> {
        self.manuscript
            .outline()
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| self.state_at(position).map(|s| (entry.id, s)))
            .collect()
    }

    /// Check that generation may start at `outline_id`, returning its
    /// position.
    ///
    /// `Ready` positions start a first generation; `Done` positions start a
    /// regeneration. Either requires the project to have nothing in flight.
    pub fn check_start(&self, outline_id: OutlineId) -> Result<usize, SequenceError> {
        let position = self
            .manuscript
            .position_of(outline_id)
            .ok_or(SequenceError::UnknownEntry(outline_id))?;

        if let Some(active) = self.active {
            return Err(SequenceError::GenerationInProgress {
                active: active.outline_id,
                phase: active.phase,
            });
        }

        match self.persisted_state(position) {
            Some(SlotState::Locked { blocked_by }) => Err(SequenceError::SequenceViolation {
                outline_id,
                blocked_by,
            }),
            Some(_) => Ok(position),
            None => Err(SequenceError::UnknownEntry(outline_id)),
        }
    }

    pub fn can_start(&self, outline_id: OutlineId) -> bool {
        self.check_start(outline_id).is_ok()
    }
}
