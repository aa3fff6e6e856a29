//! `lendstock-infra` — storage and read-model infrastructure.
//!
//! Contains the append-only event store (with the atomic multi-stream commit
//! the lending unit of work is built on), disposable read-model stores, and
//! the projections that keep them current.

pub mod event_store;
pub mod projections;
pub mod read_model;

pub use event_store::{
    Commit, EventStore, EventStoreError, InMemoryLendingStore, StoredEvent, StreamBatch,
    UncommittedEvent,
};
pub use read_model::{InMemoryKeyedStore, KeyedStore};
