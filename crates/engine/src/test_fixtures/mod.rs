//! Shared test doubles and builders.
//!
//! - [`llm::ScriptedLlm`] replays canned replies and streams.
//! - [`memory`] holds in-memory adapters for every repository port.
//! - [`stories`] builds bibles and records that pass the chapter preconditions.
//! - [`llm_integration`] helps `#[ignore]`d tests that talk to a live Ollama.

pub mod llm;
pub mod llm_integration;
pub mod memory;
pub mod stories;

pub use llm::ScriptedLlm;
pub use memory::{InMemoryBibleRepo, InMemoryChapterRepo, InMemoryCreditRepo};
pub use stories::{analysis_json, ready_bible, record};
