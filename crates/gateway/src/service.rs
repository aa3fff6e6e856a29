//! Gateway operations (application-level orchestration).
//!
//! Every write follows the same pipeline: authorize → validate → load →
//! rehydrate → handle (pure) → atomic commit (events + audit) → publish →
//! project. Aggregates decide; this module only wires their decisions into
//! one unit of work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use lendstock_audit::{AuditEntry, AuditLog};
use lendstock_auth::{Principal, authorize, permissions::known};
use lendstock_core::{Aggregate, AggregateId, ExpectedVersion, UserId};
use lendstock_events::{Event, EventBus, EventEnvelope};
use lendstock_infra::event_store::{Commit, EventStore, StoredEvent, StreamBatch};
use lendstock_infra::projections::{
    OpenLoanIndex, OpenLoanRow, StockLevelProjection, StockLevelRow,
};
use lendstock_infra::read_model::InMemoryKeyedStore;
use lendstock_ledger::{
    AdjustStock, ITEM_AGGREGATE_TYPE, ItemId, ItemSnapshot, MarkDamaged, MarkMaintenance,
    RegisterItem, ReleaseStock, ReserveStock, RetireItem, ReturnToService, StockCommand, StockItem,
    TransferStock,
};
use lendstock_lending::{
    ApproveRequest, LOAN_AGGREGATE_TYPE, LoanCommand, LoanId, LoanSnapshot, LoanTransaction,
    OpenBorrowRequest, RecordReturn, RecordTransfer, RejectRequest,
};

use crate::error::{ErrorKind, GatewayError};
use crate::requests::{BorrowRequest, RegisterItemRequest, ReturnRequest, TransferRequest};

/// Audit target table for loan transactions.
pub const LOAN_TABLE: &str = "loan_transactions";
/// Audit target table for stock records.
pub const ITEM_TABLE: &str = "stock_items";

/// Bounded retries for optimistic-concurrency losers. Each retry reloads and
/// re-validates, so a lost approve race resurfaces as `InsufficientStock`
/// rather than silently over-reserving.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

type StockLevels = StockLevelProjection<Arc<InMemoryKeyedStore<ItemId, StockLevelRow>>>;
type OpenLoans = OpenLoanIndex<Arc<InMemoryKeyedStore<LoanId, OpenLoanRow>>>;

/// The request/approval gateway: the only write path into the lending core.
pub struct LendingGateway<S, B>
where
    S: EventStore + AuditLog,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    store: S,
    bus: B,
    stock_levels: StockLevels,
    open_loans: OpenLoans,
}

impl<S, B> LendingGateway<S, B>
where
    S: EventStore + AuditLog,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            stock_levels: StockLevelProjection::new(Arc::new(InMemoryKeyedStore::new())),
            open_loans: OpenLoanIndex::new(Arc::new(InMemoryKeyedStore::new())),
        }
    }

    // ───────────────────────── lending operations ─────────────────────────

    /// Open a borrow request (Pending). Does **not** touch the ledger:
    /// reservation happens at approval, so a rejection never perturbs stock.
    pub fn create_borrow_request(
        &self,
        principal: &Principal,
        request: &BorrowRequest,
    ) -> Result<LoanSnapshot, GatewayError> {
        authorize(principal, &known::lending_request())?;
        let now = Utc::now();
        request.validate(now)?;

        let (item, _) = self.load_item(request.item_id)?;
        if !item.is_registered() {
            return Err(GatewayError::not_found("item does not exist"));
        }
        if !item.state().is_available() {
            return Err(GatewayError::new(
                ErrorKind::ItemUnavailable,
                format!("item is {}", item.state().label()),
            ));
        }
        // Advisory request-time check; re-validated at approval time.
        if request.quantity > item.on_shelf() {
            return Err(GatewayError::new(
                ErrorKind::InsufficientStock,
                format!(
                    "requested {}, available {}",
                    request.quantity,
                    item.on_shelf()
                ),
            ));
        }
        if let Some(existing) = self.open_loans.open_for(request.item_id, principal.user_id) {
            return Err(GatewayError::new(
                ErrorKind::DuplicateRequest,
                format!("open transaction {} exists for this item", existing.loan_id),
            ));
        }

        let loan_id = LoanId::new(AggregateId::new());
        let loan = LoanTransaction::empty(loan_id);
        let events = loan
            .handle(&LoanCommand::OpenBorrowRequest(OpenBorrowRequest {
                loan_id,
                item_id: request.item_id,
                borrower: principal.user_id,
                quantity: request.quantity,
                due_date: request.due_date,
                reason: request.reason.clone(),
                occurred_at: now,
            }))
            .map_err(GatewayError::from)?;

        let after = applied(&loan, &events);
        let commit = Commit::new()
            .with_batch(StreamBatch::from_typed(
                loan_id.0,
                LOAN_AGGREGATE_TYPE,
                ExpectedVersion::Exact(0),
                &events,
            )?)
            .with_audit(self.audit_entry(
                principal.user_id,
                LOAN_TABLE,
                loan_id.0,
                &events,
                None,
                &after.snapshot(),
                now,
            )?);

        self.commit_and_project(commit)?;
        info!(%loan_id, item_id = %request.item_id, quantity = request.quantity, "borrow request opened");
        Ok(after.snapshot())
    }

    /// Approve a pending request: reserve stock and move the transaction to
    /// Approved in one atomic commit. Stock is re-validated here, not just at
    /// request time; the first processed approval wins contended stock.
    pub fn approve(
        &self,
        principal: &Principal,
        loan_id: LoanId,
    ) -> Result<LoanSnapshot, GatewayError> {
        authorize(principal, &known::lending_approve())?;

        self.with_conflict_retry("approve", || {
            let now = Utc::now();
            let (loan, loan_version) = self.load_loan(loan_id)?;
            if !loan.exists() {
                return Err(GatewayError::not_found("transaction does not exist"));
            }
            let item_id = loan
                .item_id()
                .ok_or_else(|| GatewayError::internal("transaction has no item"))?;
            let (item, item_version) = self.load_item(item_id)?;

            // Both handlers are pure: any failure leaves nothing to undo.
            let loan_events = loan
                .handle(&LoanCommand::ApproveRequest(ApproveRequest {
                    loan_id,
                    approver: principal.user_id,
                    occurred_at: now,
                }))
                .map_err(GatewayError::from)?;
            let item_events = item
                .handle(&StockCommand::ReserveStock(ReserveStock {
                    item_id,
                    quantity: loan.quantity(),
                    occurred_at: now,
                }))
                .map_err(GatewayError::from)?;

            let loan_after = applied(&loan, &loan_events);
            let item_after = applied(&item, &item_events);

            let commit = Commit::new()
                .with_batch(StreamBatch::from_typed(
                    loan_id.0,
                    LOAN_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(loan_version),
                    &loan_events,
                )?)
                .with_batch(StreamBatch::from_typed(
                    item_id.0,
                    ITEM_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(item_version),
                    &item_events,
                )?)
                .with_audit(self.audit_entry(
                    principal.user_id,
                    LOAN_TABLE,
                    loan_id.0,
                    &loan_events,
                    Some(&loan.snapshot()),
                    &loan_after.snapshot(),
                    now,
                )?)
                .with_audit(self.audit_entry(
                    principal.user_id,
                    ITEM_TABLE,
                    item_id.0,
                    &item_events,
                    Some(&item.snapshot()),
                    &item_after.snapshot(),
                    now,
                )?);

            self.commit_and_project(commit)?;

            if item_after.is_below_min_level() {
                warn!(
                    %item_id,
                    on_shelf = item_after.on_shelf(),
                    min_level = item_after.min_level(),
                    "stock below minimum level after reservation"
                );
            }
            info!(%loan_id, %item_id, quantity = loan.quantity(), "borrow request approved");
            Ok(loan_after.snapshot())
        })
    }

    /// Reject a pending request. No ledger effect: nothing was reserved.
    pub fn reject(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        reason: &str,
    ) -> Result<LoanSnapshot, GatewayError> {
        authorize(principal, &known::lending_approve())?;

        let now = Utc::now();
        let (loan, loan_version) = self.load_loan(loan_id)?;
        if !loan.exists() {
            return Err(GatewayError::not_found("transaction does not exist"));
        }

        let events = loan
            .handle(&LoanCommand::RejectRequest(RejectRequest {
                loan_id,
                approver: principal.user_id,
                reason: reason.to_string(),
                occurred_at: now,
            }))
            .map_err(GatewayError::from)?;

        let after = applied(&loan, &events);
        let commit = Commit::new()
            .with_batch(StreamBatch::from_typed(
                loan_id.0,
                LOAN_AGGREGATE_TYPE,
                ExpectedVersion::Exact(loan_version),
                &events,
            )?)
            .with_audit(self.audit_entry(
                principal.user_id,
                LOAN_TABLE,
                loan_id.0,
                &events,
                Some(&loan.snapshot()),
                &after.snapshot(),
                now,
            )?);

        self.commit_and_project(commit)?;
        info!(%loan_id, reason, "borrow request rejected");
        Ok(after.snapshot())
    }

    /// Record a return: release stock and complete the transaction in one
    /// atomic commit.
    pub fn return_item(
        &self,
        principal: &Principal,
        request: &ReturnRequest,
    ) -> Result<LoanSnapshot, GatewayError> {
        authorize(principal, &known::lending_return())?;

        self.with_conflict_retry("return_item", || {
            let now = Utc::now();
            let loan_id = request.loan_id;
            let (loan, loan_version) = self.load_loan(loan_id)?;
            if !loan.exists() {
                return Err(GatewayError::not_found("transaction does not exist"));
            }
            let item_id = loan
                .item_id()
                .ok_or_else(|| GatewayError::internal("transaction has no item"))?;
            let (item, item_version) = self.load_item(item_id)?;

            let loan_events = loan
                .handle(&LoanCommand::RecordReturn(RecordReturn {
                    loan_id,
                    condition: request.condition,
                    notes: request.notes.clone(),
                    occurred_at: now,
                }))
                .map_err(GatewayError::from)?;
            let item_events = item
                .handle(&StockCommand::ReleaseStock(ReleaseStock {
                    item_id,
                    quantity: loan.quantity(),
                    occurred_at: now,
                }))
                .map_err(GatewayError::from)?;

            let loan_after = applied(&loan, &loan_events);
            let item_after = applied(&item, &item_events);

            let commit = Commit::new()
                .with_batch(StreamBatch::from_typed(
                    loan_id.0,
                    LOAN_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(loan_version),
                    &loan_events,
                )?)
                .with_batch(StreamBatch::from_typed(
                    item_id.0,
                    ITEM_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(item_version),
                    &item_events,
                )?)
                .with_audit(self.audit_entry(
                    principal.user_id,
                    LOAN_TABLE,
                    loan_id.0,
                    &loan_events,
                    Some(&loan.snapshot()),
                    &loan_after.snapshot(),
                    now,
                )?)
                .with_audit(self.audit_entry(
                    principal.user_id,
                    ITEM_TABLE,
                    item_id.0,
                    &item_events,
                    Some(&item.snapshot()),
                    &item_after.snapshot(),
                    now,
                )?);

            self.commit_and_project(commit)?;
            info!(%loan_id, %item_id, condition = ?request.condition, "item returned");
            Ok(loan_after.snapshot())
        })
    }

    // ───────────────────────── stock operations ─────────────────────────

    /// Move stock between stores (courier action). The move and its Transfer
    /// transaction record commit atomically: both legs or neither.
    pub fn transfer_stock(
        &self,
        principal: &Principal,
        request: &TransferRequest,
    ) -> Result<LoanSnapshot, GatewayError> {
        authorize(principal, &known::stock_transfer())?;
        request.validate()?;

        self.with_conflict_retry("transfer_stock", || {
            let now = Utc::now();
            let (item, item_version) = self.load_item(request.item_id)?;
            if !item.is_registered() {
                return Err(GatewayError::not_found("item does not exist"));
            }
            let from_store_id = item
                .store_id()
                .ok_or_else(|| GatewayError::internal("item has no home store"))?;

            let item_events = item
                .handle(&StockCommand::TransferStock(TransferStock {
                    item_id: request.item_id,
                    to_store_id: request.to_store_id,
                    quantity: request.quantity,
                    occurred_at: now,
                }))
                .map_err(GatewayError::from)?;

            let loan_id = LoanId::new(AggregateId::new());
            let loan = LoanTransaction::empty(loan_id);
            let loan_events = loan
                .handle(&LoanCommand::RecordTransfer(RecordTransfer {
                    loan_id,
                    item_id: request.item_id,
                    courier: principal.user_id,
                    from_store_id,
                    to_store_id: request.to_store_id,
                    quantity: request.quantity,
                    occurred_at: now,
                }))
                .map_err(GatewayError::from)?;

            let item_after = applied(&item, &item_events);
            let loan_after = applied(&loan, &loan_events);

            let commit = Commit::new()
                .with_batch(StreamBatch::from_typed(
                    request.item_id.0,
                    ITEM_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(item_version),
                    &item_events,
                )?)
                .with_batch(StreamBatch::from_typed(
                    loan_id.0,
                    LOAN_AGGREGATE_TYPE,
                    ExpectedVersion::Exact(0),
                    &loan_events,
                )?)
                .with_audit(self.audit_entry(
                    principal.user_id,
                    ITEM_TABLE,
                    request.item_id.0,
                    &item_events,
                    Some(&item.snapshot()),
                    &item_after.snapshot(),
                    now,
                )?)
                .with_audit(self.audit_entry(
                    principal.user_id,
                    LOAN_TABLE,
                    loan_id.0,
                    &loan_events,
                    None,
                    &loan_after.snapshot(),
                    now,
                )?);

            self.commit_and_project(commit)?;
            info!(
                item_id = %request.item_id,
                from = %from_store_id,
                to = %request.to_store_id,
                quantity = request.quantity,
                "stock transferred"
            );
            Ok(loan_after.snapshot())
        })
    }

    /// Register a new stock record (keeper action).
    pub fn register_item(
        &self,
        principal: &Principal,
        request: &RegisterItemRequest,
    ) -> Result<ItemSnapshot, GatewayError> {
        authorize(principal, &known::stock_manage())?;
        request.validate()?;

        let now = Utc::now();
        let item_id = ItemId::new(AggregateId::new());
        let item = StockItem::empty(item_id);
        let events = item
            .handle(&StockCommand::RegisterItem(RegisterItem {
                item_id,
                store_id: request.store_id,
                name: request.name.clone(),
                initial_quantity: request.initial_quantity,
                min_level: request.min_level,
                max_level: request.max_level,
                occurred_at: now,
            }))
            .map_err(GatewayError::from)?;

        let after = applied(&item, &events);
        let commit = Commit::new()
            .with_batch(StreamBatch::from_typed(
                item_id.0,
                ITEM_AGGREGATE_TYPE,
                ExpectedVersion::Exact(0),
                &events,
            )?)
            .with_audit(self.audit_entry(
                principal.user_id,
                ITEM_TABLE,
                item_id.0,
                &events,
                None,
                &after.snapshot(),
                now,
            )?);

        self.commit_and_project(commit)?;
        info!(%item_id, name = %request.name, quantity = request.initial_quantity, "item registered");
        Ok(after.snapshot())
    }

    /// Restock or write off shelf units (keeper action).
    pub fn adjust_stock(
        &self,
        principal: &Principal,
        item_id: ItemId,
        delta: i64,
    ) -> Result<ItemSnapshot, GatewayError> {
        authorize(principal, &known::stock_manage())?;

        self.with_conflict_retry("adjust_stock", || {
            let now = Utc::now();
            let cmd = StockCommand::AdjustStock(AdjustStock {
                item_id,
                delta,
                occurred_at: now,
            });
            let after = self.run_item_command(principal, item_id, cmd, now)?;

            if after.on_shelf < after.min_level {
                warn!(%item_id, on_shelf = after.on_shelf, min_level = after.min_level,
                    "stock below minimum level after adjustment");
            }
            info!(%item_id, delta, "stock adjusted");
            Ok(after)
        })
    }

    /// Pull an item out of circulation for maintenance.
    pub fn send_to_maintenance(
        &self,
        principal: &Principal,
        item_id: ItemId,
    ) -> Result<ItemSnapshot, GatewayError> {
        authorize(principal, &known::stock_manage())?;
        self.with_conflict_retry("send_to_maintenance", || {
            let now = Utc::now();
            let cmd = StockCommand::MarkMaintenance(MarkMaintenance {
                item_id,
                occurred_at: now,
            });
            let after = self.run_item_command(principal, item_id, cmd, now)?;
            info!(%item_id, "item sent to maintenance");
            Ok(after)
        })
    }

    /// Mark an item damaged (not lendable until returned to service).
    pub fn mark_damaged(
        &self,
        principal: &Principal,
        item_id: ItemId,
    ) -> Result<ItemSnapshot, GatewayError> {
        authorize(principal, &known::stock_manage())?;
        self.with_conflict_retry("mark_damaged", || {
            let now = Utc::now();
            let cmd = StockCommand::MarkDamaged(MarkDamaged {
                item_id,
                occurred_at: now,
            });
            let after = self.run_item_command(principal, item_id, cmd, now)?;
            info!(%item_id, "item marked damaged");
            Ok(after)
        })
    }

    /// Bring an item back from maintenance/damaged.
    pub fn return_to_service(
        &self,
        principal: &Principal,
        item_id: ItemId,
    ) -> Result<ItemSnapshot, GatewayError> {
        authorize(principal, &known::stock_manage())?;
        self.with_conflict_retry("return_to_service", || {
            let now = Utc::now();
            let cmd = StockCommand::ReturnToService(ReturnToService {
                item_id,
                occurred_at: now,
            });
            let after = self.run_item_command(principal, item_id, cmd, now)?;
            info!(%item_id, "item returned to service");
            Ok(after)
        })
    }

    /// Retire an item. Blocked while any open transaction references it, so
    /// a retired item can never receive a late reservation or return.
    pub fn retire_item(
        &self,
        principal: &Principal,
        item_id: ItemId,
    ) -> Result<ItemSnapshot, GatewayError> {
        authorize(principal, &known::stock_manage())?;

        self.with_conflict_retry("retire_item", || {
            let open = self.open_loans.open_for_item(item_id);
            if !open.is_empty() {
                return Err(GatewayError::conflict(format!(
                    "{} open transaction(s) reference this item",
                    open.len()
                )));
            }

            let now = Utc::now();
            let cmd = StockCommand::RetireItem(RetireItem {
                item_id,
                occurred_at: now,
            });
            let after = self.run_item_command(principal, item_id, cmd, now)?;
            info!(%item_id, "item retired");
            Ok(after)
        })
    }

    // ───────────────────────── read accessors ─────────────────────────

    /// Current stock row for one item.
    pub fn stock_level(&self, item_id: ItemId) -> Option<StockLevelRow> {
        self.stock_levels.get(&item_id)
    }

    /// All stock rows.
    pub fn stock_levels(&self) -> Vec<StockLevelRow> {
        self.stock_levels.list()
    }

    /// Stock rows homed at one store.
    pub fn stock_levels_for_store(&self, store_id: lendstock_core::StoreId) -> Vec<StockLevelRow> {
        self.stock_levels.list_for_store(store_id)
    }

    /// Items whose shelf count sits below their minimum level.
    pub fn below_min_level(&self) -> Vec<StockLevelRow> {
        self.stock_levels.below_min_level()
    }

    /// Full transaction state, rehydrated from its stream.
    pub fn transaction(&self, loan_id: LoanId) -> Result<LoanSnapshot, GatewayError> {
        let (loan, _) = self.load_loan(loan_id)?;
        if !loan.exists() {
            return Err(GatewayError::not_found("transaction does not exist"));
        }
        Ok(loan.snapshot())
    }

    /// All open (Pending/Approved) transactions.
    pub fn open_transactions(&self) -> Vec<OpenLoanRow> {
        self.open_loans.all_open()
    }

    /// Open transactions referencing one item.
    pub fn open_transactions_for_item(&self, item_id: ItemId) -> Vec<OpenLoanRow> {
        self.open_loans.open_for_item(item_id)
    }

    /// Approved loans past their due date (read-only reporting).
    pub fn overdue_loans(&self, as_of: DateTime<Utc>) -> Vec<OpenLoanRow> {
        self.open_loans.overdue(as_of)
    }

    /// Audit trail for one entity (manager action).
    pub fn audit_trail(
        &self,
        principal: &Principal,
        target_table: &str,
        target_id: AggregateId,
    ) -> Result<Vec<AuditEntry>, GatewayError> {
        authorize(principal, &known::audit_read())?;
        Ok(self.store.entries_for_target(target_table, target_id))
    }

    /// Audit trail for one actor (manager action).
    pub fn audit_by_actor(
        &self,
        principal: &Principal,
        actor: UserId,
    ) -> Result<Vec<AuditEntry>, GatewayError> {
        authorize(principal, &known::audit_read())?;
        Ok(self.store.entries_by_actor(actor))
    }

    /// Bulk retention cleanup (manager action). Returns removed row count.
    pub fn prune_audit_before(
        &self,
        principal: &Principal,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, GatewayError> {
        authorize(principal, &known::audit_read())?;
        let removed = self.store.prune_recorded_before(cutoff);
        info!(removed, %cutoff, "audit retention cleanup");
        Ok(removed)
    }

    // ───────────────────────── internals ─────────────────────────

    fn load_item(&self, item_id: ItemId) -> Result<(StockItem, u64), GatewayError> {
        let history = self.store.load_stream(item_id.0)?;
        let mut item = StockItem::empty(item_id);
        let version = apply_history(&mut item, &history)?;
        Ok((item, version))
    }

    fn load_loan(&self, loan_id: LoanId) -> Result<(LoanTransaction, u64), GatewayError> {
        let history = self.store.load_stream(loan_id.0)?;
        let mut loan = LoanTransaction::empty(loan_id);
        let version = apply_history(&mut loan, &history)?;
        Ok((loan, version))
    }

    /// Single-stream item mutation: load, handle, commit with audit.
    fn run_item_command(
        &self,
        principal: &Principal,
        item_id: ItemId,
        cmd: StockCommand,
        now: DateTime<Utc>,
    ) -> Result<ItemSnapshot, GatewayError> {
        let (item, item_version) = self.load_item(item_id)?;
        let events = item.handle(&cmd).map_err(GatewayError::from)?;
        let after = applied(&item, &events);

        let commit = Commit::new()
            .with_batch(StreamBatch::from_typed(
                item_id.0,
                ITEM_AGGREGATE_TYPE,
                ExpectedVersion::Exact(item_version),
                &events,
            )?)
            .with_audit(self.audit_entry(
                principal.user_id,
                ITEM_TABLE,
                item_id.0,
                &events,
                Some(&item.snapshot()),
                &after.snapshot(),
                now,
            )?);

        self.commit_and_project(commit)?;
        Ok(after.snapshot())
    }

    /// Commit atomically, then publish and apply projections.
    ///
    /// Projections are applied synchronously so reads issued right after a
    /// write observe it. Publish failures are logged, not surfaced: the store
    /// is the source of truth and consumers can rebuild from it.
    fn commit_and_project(&self, commit: Commit) -> Result<Vec<StoredEvent>, GatewayError> {
        let committed = self.store.commit(commit)?;

        for stored in &committed {
            let envelope = stored.to_envelope();

            if let Err(e) = self.stock_levels.apply_envelope(&envelope) {
                warn!(error = %e, event_type = %stored.event_type, "stock projection apply failed");
            }
            if let Err(e) = self.open_loans.apply_envelope(&envelope) {
                warn!(error = %e, event_type = %stored.event_type, "open-loan index apply failed");
            }

            if let Err(e) = self.bus.publish(envelope) {
                warn!(error = ?e, event_type = %stored.event_type, "event publication failed");
            }
        }

        Ok(committed)
    }

    /// Build the audit entry for one command's events: old/new snapshots plus
    /// the event type as the action identifier.
    #[allow(clippy::too_many_arguments)]
    fn audit_entry<E, T>(
        &self,
        actor: UserId,
        target_table: &str,
        target_id: AggregateId,
        events: &[E],
        old: Option<&T>,
        new: &T,
        recorded_at: DateTime<Utc>,
    ) -> Result<AuditEntry, GatewayError>
    where
        E: Event,
        T: Serialize,
    {
        let action = events
            .first()
            .map(|e| e.event_type())
            .ok_or_else(|| GatewayError::internal("command produced no events"))?;

        Ok(AuditEntry::new(
            actor,
            target_table,
            target_id,
            action,
            old.map(snapshot_json).transpose()?,
            snapshot_json(new)?,
            recorded_at,
        ))
    }

    /// Re-run an operation when its commit loses an optimistic-concurrency
    /// race. The closure reloads state each attempt, so retried validation
    /// sees the winner's writes.
    fn with_conflict_retry<T>(
        &self,
        op: &str,
        f: impl Fn() -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let mut attempt = 1;
        loop {
            match f() {
                Err(e) if e.kind == ErrorKind::Conflict && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(op, attempt, "commit conflict, retrying from fresh state");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Clone-and-apply: the post-state of an aggregate after `events`, leaving
/// the loaded instance untouched for the audit old-snapshot.
fn applied<A>(aggregate: &A, events: &[A::Event]) -> A
where
    A: Aggregate + Clone,
{
    let mut next = aggregate.clone();
    for e in events {
        next.apply(e);
    }
    next
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<u64, GatewayError>
where
    A: Aggregate,
    A::Event: serde::de::DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);
    let version = sorted.last().map(|e| e.sequence_number).unwrap_or(0);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| GatewayError::internal(format!("event deserialization failed: {e}")))?;
        aggregate.apply(&ev);
    }

    Ok(version)
}

fn snapshot_json<T: Serialize>(value: &T) -> Result<JsonValue, GatewayError> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::internal(format!("snapshot serialization failed: {e}")))
}
