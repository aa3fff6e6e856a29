//! Projection implementations (read model builders).
//!
//! Projections consume committed event envelopes and build query-optimized
//! read models. All projections are:
//! - **Rebuildable**: reconstructed from the event stream at any time
//! - **Idempotent**: safe for at-least-once delivery (per-stream cursors)

pub mod open_loans;
pub mod stock_levels;

use thiserror::Error;

pub use open_loans::{OpenLoanIndex, OpenLoanRow};
pub use stock_levels::{StockLevelProjection, StockLevelRow};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("stream/event identity mismatch: {0}")]
    IdentityMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}
