use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lendstock_core::{Aggregate, AggregateId, AggregateRoot, DomainError, StoreId, UserId};
use lendstock_events::Event;
use lendstock_ledger::ItemId;

/// Stream type identifier for loan transaction aggregates.
pub const AGGREGATE_TYPE: &str = "lending.loan";

/// Loan transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub AggregateId);

impl LoanId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LoanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What the transaction represents.
///
/// A return is the completion leg of a `Borrow`, not a separate transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanKind {
    Borrow,
    Transfer,
}

/// Transaction status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl LoanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Rejected | LoanStatus::Completed)
    }

    /// Open means the transaction still holds or may yet hold stock.
    pub fn is_open(self) -> bool {
        matches!(self, LoanStatus::Pending | LoanStatus::Approved)
    }

    pub fn label(self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Completed => "completed",
        }
    }
}

/// Condition an item came back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnCondition {
    Good,
    Damaged,
    Lost,
}

/// Aggregate root: LoanTransaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanTransaction {
    id: LoanId,
    kind: LoanKind,
    status: LoanStatus,
    item_id: Option<ItemId>,
    user_id: Option<UserId>,
    quantity: u32,
    due_date: Option<DateTime<Utc>>,
    reason: String,
    requested_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    return_condition: Option<ReturnCondition>,
    return_notes: Option<String>,
    returned_at: Option<DateTime<Utc>>,
    from_store_id: Option<StoreId>,
    to_store_id: Option<StoreId>,
    version: u64,
    created: bool,
}

impl LoanTransaction {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LoanId) -> Self {
        Self {
            id,
            kind: LoanKind::Borrow,
            status: LoanStatus::Pending,
            item_id: None,
            user_id: None,
            quantity: 0,
            due_date: None,
            reason: String::new(),
            requested_at: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            return_condition: None,
            return_notes: None,
            returned_at: None,
            from_store_id: None,
            to_store_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LoanId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn kind(&self) -> LoanKind {
        self.kind
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.item_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    /// Serializable view of the current state (audit snapshots, read access).
    pub fn snapshot(&self) -> LoanSnapshot {
        LoanSnapshot {
            loan_id: self.id,
            kind: self.kind,
            status: self.status,
            item_id: self.item_id,
            user_id: self.user_id,
            quantity: self.quantity,
            due_date: self.due_date,
            reason: self.reason.clone(),
            requested_at: self.requested_at,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            rejection_reason: self.rejection_reason.clone(),
            return_condition: self.return_condition,
            return_notes: self.return_notes.clone(),
            returned_at: self.returned_at,
            from_store_id: self.from_store_id,
            to_store_id: self.to_store_id,
        }
    }
}

/// Point-in-time view of a loan transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSnapshot {
    pub loan_id: LoanId,
    pub kind: LoanKind,
    pub status: LoanStatus,
    pub item_id: Option<ItemId>,
    pub user_id: Option<UserId>,
    pub quantity: u32,
    pub due_date: Option<DateTime<Utc>>,
    pub reason: String,
    pub requested_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub return_condition: Option<ReturnCondition>,
    pub return_notes: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
    pub from_store_id: Option<StoreId>,
    pub to_store_id: Option<StoreId>,
}

impl AggregateRoot for LoanTransaction {
    type Id = LoanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenBorrowRequest (borrower action, creates a Pending row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBorrowRequest {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub borrower: UserId,
    pub quantity: u32,
    pub due_date: DateTime<Utc>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveRequest (approver action, Pending → Approved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub loan_id: LoanId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectRequest (approver action, Pending → Rejected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub loan_id: LoanId,
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReturn (Approved → Completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReturn {
    pub loan_id: LoanId,
    pub condition: ReturnCondition,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordTransfer (store-to-store move, born Completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTransfer {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub courier: UserId,
    pub from_store_id: StoreId,
    pub to_store_id: StoreId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanCommand {
    OpenBorrowRequest(OpenBorrowRequest),
    ApproveRequest(ApproveRequest),
    RejectRequest(RejectRequest),
    RecordReturn(RecordReturn),
    RecordTransfer(RecordTransfer),
}

/// Event: BorrowRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequested {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub borrower: UserId,
    pub quantity: u32,
    pub due_date: DateTime<Utc>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproved {
    pub loan_id: LoanId,
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRejected {
    pub loan_id: LoanId,
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReturned {
    pub loan_id: LoanId,
    pub condition: ReturnCondition,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecorded {
    pub loan_id: LoanId,
    pub item_id: ItemId,
    pub courier: UserId,
    pub from_store_id: StoreId,
    pub to_store_id: StoreId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    BorrowRequested(BorrowRequested),
    RequestApproved(RequestApproved),
    RequestRejected(RequestRejected),
    ItemReturned(ItemReturned),
    TransferRecorded(TransferRecorded),
}

impl Event for LoanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoanEvent::BorrowRequested(_) => "lending.loan.requested",
            LoanEvent::RequestApproved(_) => "lending.loan.approved",
            LoanEvent::RequestRejected(_) => "lending.loan.rejected",
            LoanEvent::ItemReturned(_) => "lending.loan.returned",
            LoanEvent::TransferRecorded(_) => "lending.loan.transfer_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoanEvent::BorrowRequested(e) => e.occurred_at,
            LoanEvent::RequestApproved(e) => e.occurred_at,
            LoanEvent::RequestRejected(e) => e.occurred_at,
            LoanEvent::ItemReturned(e) => e.occurred_at,
            LoanEvent::TransferRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for LoanTransaction {
    type Command = LoanCommand;
    type Event = LoanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LoanEvent::BorrowRequested(e) => {
                self.id = e.loan_id;
                self.kind = LoanKind::Borrow;
                self.status = LoanStatus::Pending;
                self.item_id = Some(e.item_id);
                self.user_id = Some(e.borrower);
                self.quantity = e.quantity;
                self.due_date = Some(e.due_date);
                self.reason = e.reason.clone();
                self.requested_at = Some(e.occurred_at);
                self.created = true;
            }
            LoanEvent::RequestApproved(e) => {
                self.status = LoanStatus::Approved;
                self.approved_by = Some(e.approver);
                self.approved_at = Some(e.occurred_at);
            }
            LoanEvent::RequestRejected(e) => {
                self.status = LoanStatus::Rejected;
                self.approved_by = Some(e.approver);
                self.rejection_reason = Some(e.reason.clone());
            }
            LoanEvent::ItemReturned(e) => {
                self.status = LoanStatus::Completed;
                self.return_condition = Some(e.condition);
                self.return_notes = e.notes.clone();
                self.returned_at = Some(e.occurred_at);
            }
            LoanEvent::TransferRecorded(e) => {
                self.id = e.loan_id;
                self.kind = LoanKind::Transfer;
                self.status = LoanStatus::Completed;
                self.item_id = Some(e.item_id);
                self.user_id = Some(e.courier);
                self.quantity = e.quantity;
                self.from_store_id = Some(e.from_store_id);
                self.to_store_id = Some(e.to_store_id);
                self.requested_at = Some(e.occurred_at);
                self.created = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LoanCommand::OpenBorrowRequest(cmd) => self.handle_open(cmd),
            LoanCommand::ApproveRequest(cmd) => self.handle_approve(cmd),
            LoanCommand::RejectRequest(cmd) => self.handle_reject(cmd),
            LoanCommand::RecordReturn(cmd) => self.handle_return(cmd),
            LoanCommand::RecordTransfer(cmd) => self.handle_transfer(cmd),
        }
    }
}

impl LoanTransaction {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_loan_id(&self, loan_id: LoanId) -> Result<(), DomainError> {
        if self.id != loan_id {
            return Err(DomainError::invalid_state("loan_id mismatch"));
        }
        Ok(())
    }

    fn ensure_pending_borrow(&self) -> Result<(), DomainError> {
        if self.kind != LoanKind::Borrow {
            return Err(DomainError::invalid_state(
                "only borrow requests go through approval",
            ));
        }
        if self.status != LoanStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "transaction is {}, expected pending",
                self.status.label()
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenBorrowRequest) -> Result<Vec<LoanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transaction already exists"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("reason cannot be empty"));
        }

        Ok(vec![LoanEvent::BorrowRequested(BorrowRequested {
            loan_id: cmd.loan_id,
            item_id: cmd.item_id,
            borrower: cmd.borrower,
            quantity: cmd.quantity,
            due_date: cmd.due_date,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveRequest) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_loan_id(cmd.loan_id)?;
        self.ensure_pending_borrow()?;

        Ok(vec![LoanEvent::RequestApproved(RequestApproved {
            loan_id: cmd.loan_id,
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectRequest) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_loan_id(cmd.loan_id)?;
        self.ensure_pending_borrow()?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }

        Ok(vec![LoanEvent::RequestRejected(RequestRejected {
            loan_id: cmd.loan_id,
            approver: cmd.approver,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &RecordReturn) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_loan_id(cmd.loan_id)?;

        if self.kind != LoanKind::Borrow {
            return Err(DomainError::invalid_state("only borrows can be returned"));
        }
        if self.status != LoanStatus::Approved {
            return Err(DomainError::invalid_state(format!(
                "transaction is {}, expected approved",
                self.status.label()
            )));
        }

        Ok(vec![LoanEvent::ItemReturned(ItemReturned {
            loan_id: cmd.loan_id,
            condition: cmd.condition,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &RecordTransfer) -> Result<Vec<LoanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transaction already exists"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if cmd.from_store_id == cmd.to_store_id {
            return Err(DomainError::validation(
                "destination store equals source store",
            ));
        }

        Ok(vec![LoanEvent::TransferRecorded(TransferRecorded {
            loan_id: cmd.loan_id,
            item_id: cmd.item_id,
            courier: cmd.courier,
            from_store_id: cmd.from_store_id,
            to_store_id: cmd.to_store_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn test_loan_id() -> LoanId {
        LoanId::new(AggregateId::new())
    }

    fn test_item_id() -> ItemId {
        ItemId::new(AggregateId::new())
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(loan: &mut LoanTransaction, cmd: LoanCommand) -> Result<Vec<LoanEvent>, DomainError> {
        let events = loan.handle(&cmd)?;
        for e in &events {
            loan.apply(e);
        }
        Ok(events)
    }

    fn pending_loan() -> LoanTransaction {
        let loan_id = test_loan_id();
        let mut loan = LoanTransaction::empty(loan_id);
        run(
            &mut loan,
            LoanCommand::OpenBorrowRequest(OpenBorrowRequest {
                loan_id,
                item_id: test_item_id(),
                borrower: test_user_id(),
                quantity: 2,
                due_date: test_time() + Duration::days(7),
                reason: "field survey".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        loan
    }

    #[test]
    fn borrow_request_starts_pending() {
        let loan = pending_loan();
        assert_eq!(loan.status(), LoanStatus::Pending);
        assert_eq!(loan.kind(), LoanKind::Borrow);
        assert_eq!(loan.quantity(), 2);
    }

    #[test]
    fn empty_reason_is_rejected() {
        let loan_id = test_loan_id();
        let loan = LoanTransaction::empty(loan_id);
        let err = loan
            .handle(&LoanCommand::OpenBorrowRequest(OpenBorrowRequest {
                loan_id,
                item_id: test_item_id(),
                borrower: test_user_id(),
                quantity: 1,
                due_date: test_time(),
                reason: "  ".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn approve_moves_pending_to_approved() {
        let mut loan = pending_loan();
        let approver = test_user_id();
        let loan_id = loan.id_typed();
        run(
            &mut loan,
            LoanCommand::ApproveRequest(ApproveRequest {
                loan_id: loan_id,
                approver,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(loan.status(), LoanStatus::Approved);
        assert_eq!(loan.snapshot().approved_by, Some(approver));
        assert!(loan.snapshot().approved_at.is_some());
    }

    #[test]
    fn reject_requires_a_reason() {
        let mut loan = pending_loan();
        let loan_id = loan.id_typed();
        let err = run(
            &mut loan,
            LoanCommand::RejectRequest(RejectRequest {
                loan_id: loan_id,
                approver: test_user_id(),
                reason: String::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(loan.status(), LoanStatus::Pending);
    }

    #[test]
    fn return_completes_an_approved_loan() {
        let mut loan = pending_loan();
        let loan_id = loan.id_typed();
        run(
            &mut loan,
            LoanCommand::ApproveRequest(ApproveRequest {
                loan_id: loan_id,
                approver: test_user_id(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let loan_id = loan.id_typed();
        run(
            &mut loan,
            LoanCommand::RecordReturn(RecordReturn {
                loan_id: loan_id,
                condition: ReturnCondition::Good,
                notes: Some("all parts present".to_string()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(loan.status(), LoanStatus::Completed);
        assert_eq!(loan.snapshot().return_condition, Some(ReturnCondition::Good));
    }

    #[test]
    fn return_before_approval_is_invalid() {
        let mut loan = pending_loan();
        let loan_id = loan.id_typed();
        let err = run(
            &mut loan,
            LoanCommand::RecordReturn(RecordReturn {
                loan_id: loan_id,
                condition: ReturnCondition::Good,
                notes: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        // Rejected never transitions again.
        let mut rejected = pending_loan();
        let rejected_id = rejected.id_typed();
        run(
            &mut rejected,
            LoanCommand::RejectRequest(RejectRequest {
                loan_id: rejected_id,
                approver: test_user_id(),
                reason: "stock exhausted".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        for cmd in [
            LoanCommand::ApproveRequest(ApproveRequest {
                loan_id: rejected.id_typed(),
                approver: test_user_id(),
                occurred_at: test_time(),
            }),
            LoanCommand::RecordReturn(RecordReturn {
                loan_id: rejected.id_typed(),
                condition: ReturnCondition::Good,
                notes: None,
                occurred_at: test_time(),
            }),
        ] {
            let before = rejected.clone();
            assert!(rejected.handle(&cmd).is_err());
            assert_eq!(rejected, before);
        }

        // Completed never transitions again.
        let mut completed = pending_loan();
        let completed_id = completed.id_typed();
        run(
            &mut completed,
            LoanCommand::ApproveRequest(ApproveRequest {
                loan_id: completed_id,
                approver: test_user_id(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        let completed_id = completed.id_typed();
        run(
            &mut completed,
            LoanCommand::RecordReturn(RecordReturn {
                loan_id: completed_id,
                condition: ReturnCondition::Damaged,
                notes: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = completed
            .handle(&LoanCommand::RecordReturn(RecordReturn {
                loan_id: completed.id_typed(),
                condition: ReturnCondition::Good,
                notes: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn transfer_is_born_completed() {
        let loan_id = test_loan_id();
        let mut loan = LoanTransaction::empty(loan_id);
        run(
            &mut loan,
            LoanCommand::RecordTransfer(RecordTransfer {
                loan_id,
                item_id: test_item_id(),
                courier: test_user_id(),
                from_store_id: StoreId::new(),
                to_store_id: StoreId::new(),
                quantity: 4,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(loan.kind(), LoanKind::Transfer);
        assert_eq!(loan.status(), LoanStatus::Completed);
    }
}
