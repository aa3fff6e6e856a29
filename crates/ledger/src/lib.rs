//! Stock ledger domain module (event-sourced).
//!
//! This crate owns an item's quantity and stock state — the single source of
//! truth for "how many units are free right now". Implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod item;

pub use item::{
    AGGREGATE_TYPE as ITEM_AGGREGATE_TYPE, AdjustStock, ItemId, ItemRegistered, ItemRetired,
    ItemSnapshot, MarkDamaged, MarkMaintenance,
    MarkedDamaged, RegisterItem, ReleaseStock, ReserveStock, RetireItem, ReturnToService,
    ReturnedToService, SentToMaintenance, StockCommand, StockEvent, StockItem, StockReleased,
    StockReserved, StockState, StockTransferred, TransferStock,
};
