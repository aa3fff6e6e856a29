//! Append-only event store boundary.
//!
//! This module defines an infrastructure-facing abstraction for committing
//! and loading event streams without making any storage assumptions. The
//! commit unit spans multiple streams plus the operation's audit entries,
//! applied all-or-nothing.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLendingStore;
pub use r#trait::{Commit, EventStore, EventStoreError, StoredEvent, StreamBatch, UncommittedEvent};
