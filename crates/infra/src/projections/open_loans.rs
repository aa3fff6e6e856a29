use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use lendstock_core::{AggregateId, UserId};
use lendstock_events::EventEnvelope;
use lendstock_ledger::ItemId;
use lendstock_lending::{LOAN_AGGREGATE_TYPE, LoanEvent, LoanId, LoanStatus};

use crate::read_model::KeyedStore;

use super::ProjectionError;

/// One open (Pending or Approved) loan transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLoanRow {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub user_id: UserId,
    pub status: LoanStatus,
    pub quantity: u32,
    pub due_date: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
}

/// Index of open loan transactions.
///
/// Backs the duplicate-request check (one open transaction per (item, user)),
/// the retire gate (no retirement while loans are open), and the overdue
/// report. Rows leave the index the moment a transaction reaches a terminal
/// state; transfers never enter it (they are born Completed).
#[derive(Debug)]
pub struct OpenLoanIndex<S>
where
    S: KeyedStore<LoanId, OpenLoanRow>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> OpenLoanIndex<S>
where
    S: KeyedStore<LoanId, OpenLoanRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// The open transaction for an (item, user) pair, if any.
    pub fn open_for(&self, item_id: ItemId, user_id: UserId) -> Option<OpenLoanRow> {
        self.store
            .list()
            .into_iter()
            .find(|r| r.item_id == item_id && r.user_id == user_id)
    }

    pub fn has_open_for(&self, item_id: ItemId, user_id: UserId) -> bool {
        self.open_for(item_id, user_id).is_some()
    }

    /// All open transactions referencing an item.
    pub fn open_for_item(&self, item_id: ItemId) -> Vec<OpenLoanRow> {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.item_id == item_id)
            .collect()
    }

    /// All open transactions.
    pub fn all_open(&self) -> Vec<OpenLoanRow> {
        self.store.list()
    }

    /// Approved loans past their due date (read-only reporting, no transition).
    pub fn overdue(&self, as_of: DateTime<Utc>) -> Vec<OpenLoanRow> {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.status == LoanStatus::Approved && r.due_date < as_of)
            .collect()
    }

    /// Apply a published envelope into the index.
    ///
    /// - Ignores envelopes from other aggregate types
    /// - Enforces monotonic sequence per stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != LOAN_AGGREGATE_TYPE {
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

        let event: LoanEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        match &event {
            LoanEvent::BorrowRequested(e) => {
                if e.loan_id.0 != aggregate_id {
                    return Err(ProjectionError::IdentityMismatch(
                        "event loan_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.store.upsert(
                    e.loan_id,
                    OpenLoanRow {
                        loan_id: e.loan_id,
                        item_id: e.item_id,
                        user_id: e.borrower,
                        status: LoanStatus::Pending,
                        quantity: e.quantity,
                        due_date: e.due_date,
                        requested_at: e.occurred_at,
                    },
                );
            }
            LoanEvent::RequestApproved(e) => {
                if let Some(mut row) = self.store.get(&e.loan_id) {
                    row.status = LoanStatus::Approved;
                    self.store.upsert(e.loan_id, row);
                }
            }
            LoanEvent::RequestRejected(e) => {
                self.store.remove(&e.loan_id);
            }
            LoanEvent::ItemReturned(e) => {
                self.store.remove(&e.loan_id);
            }
            // Transfers are born Completed and never open.
            LoanEvent::TransferRecorded(_) => {}
        }

        // Advance cursor after successful apply.
        cursors.insert(aggregate_id, seq);

        Ok(())
    }

    /// Rebuild the index from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
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
    use chrono::Duration;
    use uuid::Uuid;

    use crate::read_model::InMemoryKeyedStore;
    use lendstock_lending::{BorrowRequested, ItemReturned, RequestApproved, ReturnCondition};

    fn envelope(loan_id: LoanId, seq: u64, event: &LoanEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            loan_id.0,
            LOAN_AGGREGATE_TYPE,
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn index() -> OpenLoanIndex<InMemoryKeyedStore<LoanId, OpenLoanRow>> {
        OpenLoanIndex::new(InMemoryKeyedStore::new())
    }

    fn requested(loan_id: LoanId, item_id: ItemId, user_id: UserId, due_in_days: i64) -> LoanEvent {
        LoanEvent::BorrowRequested(BorrowRequested {
            loan_id,
            item_id,
            borrower: user_id,
            quantity: 1,
            due_date: Utc::now() + Duration::days(due_in_days),
            reason: "site visit".to_string(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn pending_requests_enter_the_index() {
        let index = index();
        let loan_id = LoanId::new(AggregateId::new());
        let item_id = ItemId::new(AggregateId::new());
        let user_id = UserId::new();

        index
            .apply_envelope(&envelope(loan_id, 1, &requested(loan_id, item_id, user_id, 7)))
            .unwrap();

        assert!(index.has_open_for(item_id, user_id));
        assert_eq!(index.open_for_item(item_id).len(), 1);
    }

    #[test]
    fn terminal_transitions_leave_the_index() {
        let index = index();
        let loan_id = LoanId::new(AggregateId::new());
        let item_id = ItemId::new(AggregateId::new());
        let user_id = UserId::new();

        index
            .apply_envelope(&envelope(loan_id, 1, &requested(loan_id, item_id, user_id, 7)))
            .unwrap();
        index
            .apply_envelope(&envelope(
                loan_id,
                2,
                &LoanEvent::RequestApproved(RequestApproved {
                    loan_id,
                    approver: UserId::new(),
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();
        assert_eq!(
            index.open_for(item_id, user_id).unwrap().status,
            LoanStatus::Approved
        );

        index
            .apply_envelope(&envelope(
                loan_id,
                3,
                &LoanEvent::ItemReturned(ItemReturned {
                    loan_id,
                    condition: ReturnCondition::Good,
                    notes: None,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        assert!(!index.has_open_for(item_id, user_id));
    }

    #[test]
    fn overdue_lists_only_approved_past_due() {
        let index = index();
        let item_id = ItemId::new(AggregateId::new());

        // Approved, already past due.
        let overdue_id = LoanId::new(AggregateId::new());
        index
            .apply_envelope(&envelope(
                overdue_id,
                1,
                &requested(overdue_id, item_id, UserId::new(), -1),
            ))
            .unwrap();
        index
            .apply_envelope(&envelope(
                overdue_id,
                2,
                &LoanEvent::RequestApproved(RequestApproved {
                    loan_id: overdue_id,
                    approver: UserId::new(),
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        // Pending, past due: not overdue (nothing was lent yet).
        let pending_id = LoanId::new(AggregateId::new());
        index
            .apply_envelope(&envelope(
                pending_id,
                1,
                &requested(pending_id, item_id, UserId::new(), -1),
            ))
            .unwrap();

        let overdue = index.overdue(Utc::now());
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].loan_id, overdue_id);
    }
}
