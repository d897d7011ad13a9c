//! Generation kinds and their credit costs
//!
//! Costs are policy constants. They do not depend on prompt or output
//! length, nor on which model serves the request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Credits granted when an account is opened.
pub const NEW_ACCOUNT_CREDITS: u64 = 100;

/// A paid AI action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    /// Whole story bible from a single idea
    CompleteSetup,
    /// One setup page (core, characters, outline or instructions)
    SinglePageSetup,
    /// A chapter at the bible's target length
    ChapterNormal,
    /// A chapter at twice the target length
    ChapterLong,
}

impl GenerationKind {
    pub const fn cost(self) -> u64 {
        match self {
            Self::CompleteSetup => 10,
            Self::SinglePageSetup => 2,
            Self::ChapterNormal => 5,
            Self::ChapterLong => 8,
        }
    }

    pub const fn is_chapter(self) -> bool {
        matches!(self, Self::ChapterNormal | Self::ChapterLong)
    }

    /// Scale applied to the bible's chapter word-count target.
    pub const fn length_multiplier(self) -> u32 {
        match self {
            Self::ChapterLong => 2,
            _ => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CompleteSetup => "complete_setup",
            Self::SinglePageSetup => "single_page_setup",
            Self::ChapterNormal => "chapter_normal",
            Self::ChapterLong => "chapter_long",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "complete_setup" => Ok(Self::CompleteSetup),
            "single_page_setup" => Ok(Self::SinglePageSetup),
            "chapter_normal" => Ok(Self::ChapterNormal),
            "chapter_long" => Ok(Self::ChapterLong),
            other => Err(DomainError::validation(format!(
                "Unknown generation kind: {}",
                other
            ))),
        }
    }
}
