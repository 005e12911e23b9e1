//! Bounded working memory for conversation history.

pub mod memory;

pub use memory::{MemoryEntry, MemoryStats, WorkingMemory};
