//! Caller-facing request DTOs.
//!
//! Shape validation happens here, before any aggregate is loaded; deeper
//! preconditions (availability, stock, duplicates) are the domain's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lendstock_core::StoreId;
use lendstock_ledger::ItemId;
use lendstock_lending::{LoanId, ReturnCondition};

use crate::error::GatewayError;

/// Borrow request input (employee action).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub item_id: ItemId,
    pub quantity: u32,
    pub due_date: DateTime<Utc>,
    pub reason: String,
}

impl BorrowRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), GatewayError> {
        if self.quantity == 0 {
            return Err(GatewayError::validation("quantity must be at least 1"));
        }
        if self.reason.trim().is_empty() {
            return Err(GatewayError::validation("reason cannot be empty"));
        }
        if self.due_date <= now {
            return Err(GatewayError::validation("due date must be in the future"));
        }
        Ok(())
    }
}

/// Return input (Approved → Completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub loan_id: LoanId,
    pub condition: ReturnCondition,
    pub notes: Option<String>,
}

/// Store-to-store move input (courier action).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub item_id: ItemId,
    pub to_store_id: StoreId,
    pub quantity: u32,
}

impl TransferRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.quantity == 0 {
            return Err(GatewayError::validation("quantity must be at least 1"));
        }
        Ok(())
    }
}

/// New stock record input (keeper action).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItemRequest {
    pub store_id: StoreId,
    pub name: String,
    pub initial_quantity: u32,
    pub min_level: u32,
    pub max_level: Option<u32>,
}

impl RegisterItemRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::validation("name cannot be empty"));
        }
        if let Some(max) = self.max_level {
            if max < self.min_level {
                return Err(GatewayError::validation("max_level below min_level"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lendstock_core::AggregateId;

    #[test]
    fn borrow_request_rejects_past_due_dates() {
        let now = Utc::now();
        let request = BorrowRequest {
            item_id: ItemId::new(AggregateId::new()),
            quantity: 1,
            due_date: now - Duration::days(1),
            reason: "inventory count".to_string(),
        };
        assert!(request.validate(now).is_err());
    }

    #[test]
    fn register_request_rejects_inverted_levels() {
        let request = RegisterItemRequest {
            store_id: StoreId::new(),
            name: "Pallet jack".to_string(),
            initial_quantity: 2,
            min_level: 5,
            max_level: Some(3),
        };
        assert!(request.validate().is_err());
    }
}
