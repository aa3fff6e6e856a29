//! Lending domain module (event-sourced).
//!
//! One `LoanTransaction` aggregate per borrow/return lifecycle instance:
//! `Pending → {Approved, Rejected}`, `Approved → Completed`. Terminal states
//! are absorbing. Stock accounting lives in `lendstock-ledger`; coupling the
//! two into one atomic unit is the gateway's job.

pub mod loan;

pub use loan::{
    AGGREGATE_TYPE as LOAN_AGGREGATE_TYPE, ApproveRequest, BorrowRequested, ItemReturned,
    LoanCommand, LoanEvent, LoanId, LoanKind,
    LoanSnapshot, LoanStatus, LoanTransaction, OpenBorrowRequest, RecordReturn, RecordTransfer,
    RejectRequest, RequestApproved, RequestRejected, ReturnCondition, TransferRecorded,
};
