//! `lendstock-events` — event contracts and in-process distribution.
//!
//! Domain crates emit typed events; infrastructure wraps them in envelopes,
//! persists them, and fans them out to projections through the bus.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
