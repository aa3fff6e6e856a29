use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use lendstock_core::{Aggregate, AggregateId, StoreId};
use lendstock_events::EventEnvelope;
use lendstock_ledger::{ITEM_AGGREGATE_TYPE, ItemId, StockEvent, StockItem};

use crate::read_model::KeyedStore;

use super::ProjectionError;

/// Queryable stock read model: current shelf/loan counts per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevelRow {
    pub item_id: ItemId,
    pub store_id: Option<StoreId>,
    pub name: String,
    pub status: String,
    pub on_shelf: u32,
    pub on_loan: u32,
    pub min_level: u32,
    pub max_level: Option<u32>,
    /// Advisory: shelf count has fallen below the minimum stock level.
    pub below_min: bool,
}

/// Stock level projection.
///
/// Folds ledger events through the `StockItem` aggregate itself — the same
/// `apply` the write side uses — so read rows can never drift from the
/// domain's stock math. Rows are disposable and rebuildable from the stream.
#[derive(Debug)]
pub struct StockLevelProjection<S>
where
    S: KeyedStore<ItemId, StockLevelRow>,
{
    store: S,
    aggregates: RwLock<HashMap<ItemId, StockItem>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> StockLevelProjection<S>
where
    S: KeyedStore<ItemId, StockLevelRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            aggregates: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the read model for one item.
    pub fn get(&self, item_id: &ItemId) -> Option<StockLevelRow> {
        self.store.get(item_id)
    }

    /// List all stock rows.
    pub fn list(&self) -> Vec<StockLevelRow> {
        self.store.list()
    }

    /// List stock rows for one store.
    pub fn list_for_store(&self, store_id: StoreId) -> Vec<StockLevelRow> {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.store_id == Some(store_id))
            .collect()
    }

    /// Items whose shelf count sits below their minimum level.
    pub fn below_min_level(&self) -> Vec<StockLevelRow> {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.below_min)
            .collect()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Ignores envelopes from other aggregate types
    /// - Enforces monotonic sequence per stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != ITEM_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let Ok(mut cursors) = self.cursors.write() else {
            return Ok(());
        };

        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let item_id = ItemId::new(aggregate_id);

        let Ok(mut aggregates) = self.aggregates.write() else {
            return Ok(());
        };
        let item = aggregates
            .entry(item_id)
            .or_insert_with(|| StockItem::empty(item_id));
        item.apply(&event);

        let snapshot = item.snapshot();
        self.store.upsert(
            item_id,
            StockLevelRow {
                item_id,
                store_id: snapshot.store_id,
                name: snapshot.name,
                status: snapshot.status,
                on_shelf: snapshot.on_shelf,
                on_loan: snapshot.on_loan,
                min_level: snapshot.min_level,
                max_level: snapshot.max_level,
                below_min: item.is_below_min_level(),
            },
        );

        // Advance cursor after successful apply.
        cursors.insert(aggregate_id, seq);

        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        if let Ok(mut aggregates) = self.aggregates.write() {
            aggregates.clear();
        }
        self.store.clear();

        // Deterministic replay order: aggregate, then sequence.
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::read_model::InMemoryKeyedStore;
    use lendstock_ledger::{ItemRegistered, StockReserved};

    fn envelope(item_id: ItemId, seq: u64, event: &StockEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            item_id.0,
            ITEM_AGGREGATE_TYPE,
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn projection() -> StockLevelProjection<InMemoryKeyedStore<ItemId, StockLevelRow>> {
        StockLevelProjection::new(InMemoryKeyedStore::new())
    }

    fn registered(item_id: ItemId, quantity: u32, min_level: u32) -> StockEvent {
        StockEvent::ItemRegistered(ItemRegistered {
            item_id,
            store_id: StoreId::new(),
            name: "Theodolite".to_string(),
            initial_quantity: quantity,
            min_level,
            max_level: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn events_fold_into_stock_rows() {
        let projection = projection();
        let item_id = ItemId::new(AggregateId::new());

        projection
            .apply_envelope(&envelope(item_id, 1, &registered(item_id, 5, 0)))
            .unwrap();
        projection
            .apply_envelope(&envelope(
                item_id,
                2,
                &StockEvent::StockReserved(StockReserved {
                    item_id,
                    quantity: 3,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        let row = projection.get(&item_id).unwrap();
        assert_eq!(row.on_shelf, 2);
        assert_eq!(row.on_loan, 3);
        assert_eq!(row.status, "available");
    }

    #[test]
    fn replayed_envelopes_are_ignored() {
        let projection = projection();
        let item_id = ItemId::new(AggregateId::new());
        let env = envelope(item_id, 1, &registered(item_id, 5, 0));

        projection.apply_envelope(&env).unwrap();
        projection.apply_envelope(&env).unwrap();

        assert_eq!(projection.get(&item_id).unwrap().on_shelf, 5);
        assert_eq!(projection.list().len(), 1);
    }

    #[test]
    fn sequence_gaps_are_detected() {
        let projection = projection();
        let item_id = ItemId::new(AggregateId::new());

        projection
            .apply_envelope(&envelope(item_id, 1, &registered(item_id, 5, 0)))
            .unwrap();

        let gap = envelope(
            item_id,
            3,
            &StockEvent::StockReserved(StockReserved {
                item_id,
                quantity: 1,
                occurred_at: Utc::now(),
            }),
        );
        let err = projection.apply_envelope(&gap).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::NonMonotonicSequence { last: 1, found: 3 }
        ));
    }

    #[test]
    fn low_stock_flag_appears_in_rows() {
        let projection = projection();
        let item_id = ItemId::new(AggregateId::new());

        projection
            .apply_envelope(&envelope(item_id, 1, &registered(item_id, 2, 2)))
            .unwrap();
        projection
            .apply_envelope(&envelope(
                item_id,
                2,
                &StockEvent::StockReserved(StockReserved {
                    item_id,
                    quantity: 1,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        assert_eq!(projection.below_min_level().len(), 1);
    }

    #[test]
    fn foreign_aggregate_types_are_skipped() {
        let projection = projection();
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "lending.loan",
            1,
            serde_json::json!({"unrelated": true}),
        );

        projection.apply_envelope(&env).unwrap();
        assert!(projection.list().is_empty());
    }
}
