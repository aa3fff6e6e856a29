//! Disposable read-model storage abstractions.

pub mod store;

pub use store::{InMemoryKeyedStore, KeyedStore};
