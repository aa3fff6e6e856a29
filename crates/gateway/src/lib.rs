//! `lendstock-gateway` — the request/approval gateway.
//!
//! The only path by which callers invoke a transition. Each operation:
//!
//! 1. authorizes the acting principal,
//! 2. validates input shape,
//! 3. loads and rehydrates the touched aggregates,
//! 4. runs their pure command handlers (all preconditions, no side effects),
//! 5. commits every produced event **and** the operation's audit entries in
//!    one atomic multi-stream commit,
//! 6. publishes the committed events and applies the read-model projections.
//!
//! Concurrent mutations of the same item are serialized by the item stream's
//! optimistic version expectation; the gateway retries a lost race a bounded
//! number of times, re-running validation from fresh state.

pub mod error;
pub mod requests;
pub mod service;


pub use error::{ErrorKind, GatewayError};
pub use requests::{BorrowRequest, RegisterItemRequest, ReturnRequest, TransferRequest};
pub use service::LendingGateway;
