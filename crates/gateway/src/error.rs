use serde::Serialize;
use thiserror::Error;

use lendstock_auth::AuthzError;
use lendstock_core::DomainError;
use lendstock_infra::EventStoreError;

/// Machine-readable failure category, surfaced verbatim to callers so they
/// can distinguish "bad input" from "state conflict".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed shape validation; nothing was read or written.
    Validation,
    /// The item exists but is not in a lendable state.
    ItemUnavailable,
    /// Requested more units than are currently on the shelf.
    InsufficientStock,
    /// An open transaction already exists for this (item, user) pair.
    DuplicateRequest,
    /// The transaction is not in a state that permits this transition.
    InvalidState,
    /// Referenced item/transaction does not exist.
    NotFound,
    /// The acting principal lacks the required permission.
    Unauthorized,
    /// Optimistic concurrency lost after retries, or a guarded state race.
    Conflict,
    /// Storage/serialization fault; not a caller error.
    Internal,
}

/// Structured gateway error: a category plus a human-readable message.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<DomainError> for GatewayError {
    fn from(value: DomainError) -> Self {
        let message = value.to_string();
        let kind = match value {
            DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
            DomainError::ItemUnavailable(_) => ErrorKind::ItemUnavailable,
            DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            DomainError::DuplicateRequest(_) => ErrorKind::DuplicateRequest,
            DomainError::InvalidState(_) => ErrorKind::InvalidState,
            DomainError::NotFound => ErrorKind::NotFound,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::Unauthorized => ErrorKind::Unauthorized,
        };
        Self::new(kind, message)
    }
}

impl From<EventStoreError> for GatewayError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => Self::conflict(msg.clone()),
            EventStoreError::AggregateTypeMismatch(_) | EventStoreError::InvalidCommit(_) => {
                Self::internal(value.to_string())
            }
        }
    }
}

impl From<AuthzError> for GatewayError {
    fn from(value: AuthzError) -> Self {
        Self::new(ErrorKind::Unauthorized, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_onto_caller_facing_kinds() {
        let err: GatewayError = DomainError::insufficient_stock(3, 1).into();
        assert_eq!(err.kind, ErrorKind::InsufficientStock);

        let err: GatewayError = DomainError::invalid_state("transaction is rejected").into();
        assert_eq!(err.kind, ErrorKind::InvalidState);

        let err: GatewayError = DomainError::not_found().into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn store_concurrency_surfaces_as_conflict() {
        let err: GatewayError = EventStoreError::Concurrency("stale".to_string()).into();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }
}
