//! Folio Engine library.
//!
//! Server side of Folio: story bibles, strictly sequential chapter
//! generation and the continuity records that chain chapters together.
//!
//! ## Structure
//!
//! - `use_cases/` - User story orchestration over the domain rules
//! - `stores/` - In-process state (running generations, unflushed drafts)
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `api/` - HTTP entry points
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod prompt_templates;
pub mod stores;
pub mod use_cases;

/// Test fixtures shared by unit tests.
#[cfg(test)]
pub mod test_fixtures;

pub use app::App;
