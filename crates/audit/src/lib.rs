//! `lendstock-audit` — immutable audit trail contracts.
//!
//! Every mutation the core performs commits exactly one audit entry per
//! touched entity, carrying the pre- and post-snapshot. Entries ride inside
//! the same atomic commit as the domain events, so a mutation can never exist
//! without its audit record (and vice versa). The only deletion path is bulk
//! retention pruning.

pub mod entry;
pub mod log;

pub use entry::AuditEntry;
pub use log::AuditLog;
