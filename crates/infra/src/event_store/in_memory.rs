use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use lendstock_audit::{AuditEntry, AuditLog};
use lendstock_core::{AggregateId, UserId};

use super::r#trait::{Commit, EventStore, EventStoreError, StoredEvent};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<AggregateId, Vec<StoredEvent>>,
    audit: Vec<AuditEntry>,
}

/// In-memory append-only event store + audit log.
///
/// Both live behind one lock so a commit is atomic across every stream it
/// touches *and* the audit trail. Intended for tests/dev and as the reference
/// implementation of the storage traits; not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryLendingStore {
    inner: RwLock<Inner>,
}

impl InMemoryLendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryLendingStore {
    fn commit(&self, commit: Commit) -> Result<Vec<StoredEvent>, EventStoreError> {
        if commit.batches.iter().all(|b| b.events.is_empty()) && commit.audit.is_empty() {
            return Ok(vec![]);
        }

        // Each stream may appear at most once per commit; otherwise the
        // expected-version bookkeeping below would be ambiguous.
        for (idx, batch) in commit.batches.iter().enumerate() {
            if commit.batches[..idx]
                .iter()
                .any(|b| b.aggregate_id == batch.aggregate_id)
            {
                return Err(EventStoreError::InvalidCommit(format!(
                    "duplicate stream in commit (index {idx})"
                )));
            }
            for (eidx, e) in batch.events.iter().enumerate() {
                if e.aggregate_id != batch.aggregate_id {
                    return Err(EventStoreError::InvalidCommit(format!(
                        "batch {idx} contains foreign aggregate_id (event index {eidx})"
                    )));
                }
                if e.aggregate_type != batch.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "batch {idx} contains foreign aggregate_type (event index {eidx})"
                    )));
                }
            }
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| EventStoreError::InvalidCommit("lock poisoned".to_string()))?;

        // Validate every batch before writing anything: all-or-nothing.
        for batch in &commit.batches {
            let stream = inner.streams.get(&batch.aggregate_id);
            let current = stream.map(|s| Self::current_version(s)).unwrap_or(0);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    batch.aggregate_id, batch.expected_version
                )));
            }

            // Enforce aggregate type stability across the stream.
            if let Some(existing) = stream.and_then(|s| s.first()) {
                if existing.aggregate_type != batch.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted commit with '{}'",
                        existing.aggregate_type, batch.aggregate_type
                    )));
                }
            }
        }

        // Assign sequence numbers and append (append-only).
        let mut committed = Vec::new();
        for batch in commit.batches {
            let stream = inner.streams.entry(batch.aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;

            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        inner.audit.extend(commit.audit);

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| EventStoreError::InvalidCommit("lock poisoned".to_string()))?;

        Ok(inner.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}

impl AuditLog for InMemoryLendingStore {
    fn entries_for_target(&self, target_table: &str, target_id: AggregateId) -> Vec<AuditEntry> {
        match self.inner.read() {
            Ok(inner) => inner
                .audit
                .iter()
                .filter(|e| e.target_table == target_table && e.target_id == target_id)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    fn entries_by_actor(&self, actor: UserId) -> Vec<AuditEntry> {
        match self.inner.read() {
            Ok(inner) => inner
                .audit
                .iter()
                .filter(|e| e.actor == actor)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    fn all_entries(&self) -> Vec<AuditEntry> {
        match self.inner.read() {
            Ok(inner) => inner.audit.clone(),
            Err(_) => vec![],
        }
    }

    fn prune_recorded_before(&self, cutoff: DateTime<Utc>) -> usize {
        match self.inner.write() {
            Ok(mut inner) => {
                let before = inner.audit.len();
                inner.audit.retain(|e| e.recorded_at >= cutoff);
                before - inner.audit.len()
            }
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::r#trait::StreamBatch;
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use lendstock_core::ExpectedVersion;
    use lendstock_ledger::{ItemRegistered, ItemId, StockEvent, StockReserved};

    fn test_item_id() -> ItemId {
        ItemId::new(AggregateId::new())
    }

    fn registered_event(item_id: ItemId, quantity: u32) -> StockEvent {
        StockEvent::ItemRegistered(ItemRegistered {
            item_id,
            store_id: lendstock_core::StoreId::new(),
            name: "Multimeter".to_string(),
            initial_quantity: quantity,
            min_level: 0,
            max_level: None,
            occurred_at: Utc::now(),
        })
    }

    fn reserved_event(item_id: ItemId, quantity: u32) -> StockEvent {
        StockEvent::StockReserved(StockReserved {
            item_id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    fn audit_row() -> AuditEntry {
        AuditEntry::new(
            UserId::new(),
            "stock_items",
            AggregateId::new(),
            "ledger.item.registered",
            None,
            json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn commit_assigns_monotonic_sequence_numbers() {
        let store = InMemoryLendingStore::new();
        let item_id = test_item_id();

        let batch = StreamBatch::from_typed(
            item_id.0,
            "ledger.item",
            ExpectedVersion::Exact(0),
            &[registered_event(item_id, 5), reserved_event(item_id, 2)],
        )
        .unwrap();

        let stored = store.commit(Commit::new().with_batch(batch)).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].sequence_number, 1);
        assert_eq!(stored[1].sequence_number, 2);

        let loaded = store.load_stream(item_id.0).unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryLendingStore::new();
        let item_id = test_item_id();

        let first = StreamBatch::from_typed(
            item_id.0,
            "ledger.item",
            ExpectedVersion::Exact(0),
            &[registered_event(item_id, 5)],
        )
        .unwrap();
        store.commit(Commit::new().with_batch(first)).unwrap();

        // A second writer that also observed version 0 loses.
        let stale = StreamBatch::from_typed(
            item_id.0,
            "ledger.item",
            ExpectedVersion::Exact(0),
            &[reserved_event(item_id, 1)],
        )
        .unwrap();
        let err = store.commit(Commit::new().with_batch(stale)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn failed_commit_writes_nothing_at_all() {
        let store = InMemoryLendingStore::new();
        let item_id = test_item_id();
        let other_id = test_item_id();

        let good = StreamBatch::from_typed(
            item_id.0,
            "ledger.item",
            ExpectedVersion::Exact(0),
            &[registered_event(item_id, 5)],
        )
        .unwrap();
        // Wrong expectation: this stream is empty, version 0, not 3.
        let bad = StreamBatch::from_typed(
            other_id.0,
            "ledger.item",
            ExpectedVersion::Exact(3),
            &[registered_event(other_id, 1)],
        )
        .unwrap();

        let err = store
            .commit(
                Commit::new()
                    .with_batch(good)
                    .with_batch(bad)
                    .with_audit(audit_row()),
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        // Neither stream nor the audit trail was touched.
        assert!(store.load_stream(item_id.0).unwrap().is_empty());
        assert!(store.load_stream(other_id.0).unwrap().is_empty());
        assert!(store.all_entries().is_empty());
    }

    #[test]
    fn audit_entries_land_with_the_commit() {
        let store = InMemoryLendingStore::new();
        let item_id = test_item_id();

        let batch = StreamBatch::from_typed(
            item_id.0,
            "ledger.item",
            ExpectedVersion::Exact(0),
            &[registered_event(item_id, 5)],
        )
        .unwrap();

        let entry = audit_row();
        let actor = entry.actor;
        store
            .commit(Commit::new().with_batch(batch).with_audit(entry))
            .unwrap();

        assert_eq!(store.all_entries().len(), 1);
        assert_eq!(store.entries_by_actor(actor).len(), 1);
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryLendingStore::new();
        let item_id = test_item_id();

        let batch = StreamBatch::from_typed(
            item_id.0,
            "ledger.item",
            ExpectedVersion::Exact(0),
            &[registered_event(item_id, 5)],
        )
        .unwrap();
        store.commit(Commit::new().with_batch(batch)).unwrap();

        let wrong_type = StreamBatch::from_typed(
            item_id.0,
            "lending.loan",
            ExpectedVersion::Exact(1),
            &[reserved_event(item_id, 1)],
        )
        .unwrap();
        let err = store
            .commit(Commit::new().with_batch(wrong_type))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn retention_prunes_only_old_entries() {
        let store = InMemoryLendingStore::new();
        let old = AuditEntry::new(
            UserId::new(),
            "stock_items",
            AggregateId::new(),
            "ledger.stock.adjusted",
            None,
            json!({}),
            Utc::now() - chrono::Duration::days(400),
        );
        let recent = audit_row();

        store
            .commit(Commit::new().with_audit(old).with_audit(recent))
            .unwrap();

        let removed = store.prune_recorded_before(Utc::now() - chrono::Duration::days(365));
        assert_eq!(removed, 1);
        assert_eq!(store.all_entries().len(), 1);
    }
}
