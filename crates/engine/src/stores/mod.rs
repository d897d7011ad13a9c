//! In-memory state storage modules.
//!
//! Stores manage runtime state that doesn't belong in the database:
//! - `ActiveGenerationStore` - the one in-flight generation per project
//! - `PendingWriteQueue` - draft snapshots awaiting persistence

pub mod active_generation;
pub mod pending_writes;

pub use active_generation::{ActiveGenerationStore, GenerationLease};
pub use pending_writes::{FlushReport, PendingWriteQueue};
