use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use lendstock_audit::AuditEntry;
use lendstock_core::{AggregateId, ExpectedVersion};

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number). The event store assigns sequence numbers during commit.
///
/// Use [`UncommittedEvent::from_typed`] to build one from a typed domain
/// event: it serializes the payload to JSON and captures the event metadata
/// needed for later deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from business code while still capturing the
    /// metadata needed for deserialization on replay.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: lendstock_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidCommit(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are stream-scoped, start at 1, increase monotonically,
/// and never change once assigned. They drive event ordering, optimistic
/// concurrency, and projection idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> lendstock_events::EventEnvelope<JsonValue> {
        lendstock_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Events destined for one stream, with that stream's version expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBatch {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub expected_version: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

impl StreamBatch {
    /// Build a batch from typed domain events, minting UUIDv7 event ids.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        expected_version: ExpectedVersion,
        events: &[E],
    ) -> Result<Self, EventStoreError>
    where
        E: lendstock_events::Event + Serialize,
    {
        let aggregate_type = aggregate_type.into();
        let events = events
            .iter()
            .map(|e| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    e,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            aggregate_id,
            aggregate_type,
            expected_version,
            events,
        })
    }
}

/// One atomic unit of work: event batches for one or more streams plus the
/// operation's audit entries. Either everything is persisted or nothing is.
///
/// This is how "state transition + ledger update + audit record" stays a
/// single unit: the approve path commits the transaction stream's event, the
/// item stream's reservation, and both audit rows in one call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Commit {
    pub batches: Vec<StreamBatch>,
    pub audit: Vec<AuditEntry>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, batch: StreamBatch) -> Self {
        self.batches.push(batch);
        self
    }

    pub fn with_audit(mut self, entry: AuditEntry) -> Self {
        self.audit.push(entry);
        self
    }
}

/// Event store operation error (infrastructure, not domain).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency check failed (stale stream version).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// Event type doesn't match the stream's established aggregate type.
    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    /// Invalid commit contents or internal storage failure.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),
}

/// Append-only event store with atomic multi-stream commits.
///
/// Implementations must:
/// - check every batch's `expected_version` against its stream **before**
///   writing anything (all-or-nothing)
/// - assign monotonically increasing `sequence_number`s per stream,
///   starting at `current_version + 1`
/// - persist the commit's audit entries in the same atomic unit
/// - enforce aggregate type stability per stream
pub trait EventStore: Send + Sync {
    /// Apply a commit atomically. Returns the stored events in batch order.
    fn commit(&self, commit: Commit) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate (empty if it does not exist).
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn commit(&self, commit: Commit) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).commit(commit)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }
}
