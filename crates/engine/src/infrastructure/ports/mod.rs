//! Port traits for infrastructure boundaries.
//!
//! Ports exist for:
//! - Database access (SQLite today, anything with an upsert tomorrow)
//! - LLM calls (any OpenAI-compatible backend)
//! - Clock (for testing)

mod error;
mod external;
mod repos;
mod testing;

pub use repos::{BibleRepo, ChapterRepo, CreditRepo, DebitOutcome, DraftSnapshot};

pub use external::{
    ChatMessage, FinishReason, LlmPort, LlmRequest, LlmResponse, MessageRole, TextStream,
    TokenUsage,
};

#[cfg(test)]
pub use repos::{MockChapterRepo, MockCreditRepo};

pub use testing::ClockPort;

pub use error::{LlmError, RepoError};
