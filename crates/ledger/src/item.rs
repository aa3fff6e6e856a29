use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lendstock_core::{Aggregate, AggregateId, AggregateRoot, DomainError, StoreId};
use lendstock_events::Event;

/// Stream type identifier for stock item aggregates.
pub const AGGREGATE_TYPE: &str = "ledger.item";

/// Stock record identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub AggregateId);

impl ItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stock state of an item.
///
/// `Available` carries the on-shelf count as `NonZeroU32`, so
/// "available implies at least one unit on the shelf" holds by construction
/// rather than by convention. States that take stock off the lending path
/// (`Maintenance`, `Damaged`) keep their shelf count so the units come back
/// when the item returns to service.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockState {
    /// Units on the shelf, free to lend.
    Available(NonZeroU32),
    /// Nothing on the shelf; remaining units are out on loan.
    Reserved,
    /// Pulled for maintenance; shelf units are not lendable.
    Maintenance { on_shelf: u32 },
    /// Marked damaged; shelf units are not lendable.
    Damaged { on_shelf: u32 },
    /// Written off. Terminal.
    Retired,
}

impl StockState {
    /// Units physically on the shelf regardless of lendability.
    pub fn on_shelf(&self) -> u32 {
        match self {
            StockState::Available(q) => q.get(),
            StockState::Reserved | StockState::Retired => 0,
            StockState::Maintenance { on_shelf } | StockState::Damaged { on_shelf } => *on_shelf,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, StockState::Available(_))
    }

    pub fn is_retired(&self) -> bool {
        matches!(self, StockState::Retired)
    }

    /// Stable lowercase label (read models, audit snapshots).
    pub fn label(&self) -> &'static str {
        match self {
            StockState::Available(_) => "available",
            StockState::Reserved => "reserved",
            StockState::Maintenance { .. } => "maintenance",
            StockState::Damaged { .. } => "damaged",
            StockState::Retired => "retired",
        }
    }

    /// Lendable state for a given shelf count: zero units means `Reserved`.
    fn from_shelf(on_shelf: u32) -> Self {
        match NonZeroU32::new(on_shelf) {
            Some(q) => StockState::Available(q),
            None => StockState::Reserved,
        }
    }
}

/// Aggregate root: StockItem — one stock record per item at its home store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: ItemId,
    store_id: Option<StoreId>,
    name: String,
    state: StockState,
    on_loan: u32,
    min_level: u32,
    max_level: Option<u32>,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: ItemId) -> Self {
        Self {
            id,
            store_id: None,
            name: String::new(),
            state: StockState::Reserved,
            on_loan: 0,
            min_level: 0,
            max_level: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ItemId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn store_id(&self) -> Option<StoreId> {
        self.store_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StockState {
        self.state
    }

    pub fn on_shelf(&self) -> u32 {
        self.state.on_shelf()
    }

    /// Units currently out on loan.
    pub fn on_loan(&self) -> u32 {
        self.on_loan
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> Option<u32> {
        self.max_level
    }

    /// Advisory: shelf count has fallen below the minimum stock level.
    pub fn is_below_min_level(&self) -> bool {
        self.on_shelf() < self.min_level
    }

    /// Serializable view of the current state (audit snapshots, read access).
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            item_id: self.id,
            store_id: self.store_id,
            name: self.name.clone(),
            status: self.state.label().to_string(),
            on_shelf: self.on_shelf(),
            on_loan: self.on_loan,
            min_level: self.min_level,
            max_level: self.max_level,
        }
    }
}

/// Point-in-time view of a stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub item_id: ItemId,
    pub store_id: Option<StoreId>,
    pub name: String,
    pub status: String,
    pub on_shelf: u32,
    pub on_loan: u32,
    pub min_level: u32,
    pub max_level: Option<u32>,
}

impl AggregateRoot for StockItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub item_id: ItemId,
    pub store_id: StoreId,
    pub name: String,
    pub initial_quantity: u32,
    pub min_level: u32,
    pub max_level: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (hard hold taken at approval time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (return path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransferStock (store-to-store move).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub item_id: ItemId,
    pub to_store_id: StoreId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (restock / shrinkage, keeper-driven).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub item_id: ItemId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkMaintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkMaintenance {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDamaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDamaged {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToService (out of maintenance/damaged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToService {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetireItem. The caller must ensure no open loans reference the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireItem {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    RegisterItem(RegisterItem),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    TransferStock(TransferStock),
    AdjustStock(AdjustStock),
    MarkMaintenance(MarkMaintenance),
    MarkDamaged(MarkDamaged),
    ReturnToService(ReturnToService),
    RetireItem(RetireItem),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub item_id: ItemId,
    pub store_id: StoreId,
    pub name: String,
    pub initial_quantity: u32,
    pub min_level: u32,
    pub max_level: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub item_id: ItemId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockTransferred.
///
/// On a single stock record the reserve-at-source / release-at-destination
/// legs net out; the observable effect is the store reference moving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferred {
    pub item_id: ItemId,
    pub from_store_id: StoreId,
    pub to_store_id: StoreId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub item_id: ItemId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SentToMaintenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentToMaintenance {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MarkedDamaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedDamaged {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnedToService.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedToService {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRetired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRetired {
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    ItemRegistered(ItemRegistered),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    StockTransferred(StockTransferred),
    StockAdjusted(StockAdjusted),
    SentToMaintenance(SentToMaintenance),
    MarkedDamaged(MarkedDamaged),
    ReturnedToService(ReturnedToService),
    ItemRetired(ItemRetired),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::ItemRegistered(_) => "ledger.item.registered",
            StockEvent::StockReserved(_) => "ledger.stock.reserved",
            StockEvent::StockReleased(_) => "ledger.stock.released",
            StockEvent::StockTransferred(_) => "ledger.stock.transferred",
            StockEvent::StockAdjusted(_) => "ledger.stock.adjusted",
            StockEvent::SentToMaintenance(_) => "ledger.item.maintenance",
            StockEvent::MarkedDamaged(_) => "ledger.item.damaged",
            StockEvent::ReturnedToService(_) => "ledger.item.returned_to_service",
            StockEvent::ItemRetired(_) => "ledger.item.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::ItemRegistered(e) => e.occurred_at,
            StockEvent::StockReserved(e) => e.occurred_at,
            StockEvent::StockReleased(e) => e.occurred_at,
            StockEvent::StockTransferred(e) => e.occurred_at,
            StockEvent::StockAdjusted(e) => e.occurred_at,
            StockEvent::SentToMaintenance(e) => e.occurred_at,
            StockEvent::MarkedDamaged(e) => e.occurred_at,
            StockEvent::ReturnedToService(e) => e.occurred_at,
            StockEvent::ItemRetired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::ItemRegistered(e) => {
                self.id = e.item_id;
                self.store_id = Some(e.store_id);
                self.name = e.name.clone();
                self.state = StockState::from_shelf(e.initial_quantity);
                self.on_loan = 0;
                self.min_level = e.min_level;
                self.max_level = e.max_level;
                self.created = true;
            }
            StockEvent::StockReserved(e) => {
                let remaining = self.on_shelf().saturating_sub(e.quantity);
                self.state = StockState::from_shelf(remaining);
                self.on_loan += e.quantity;
            }
            StockEvent::StockReleased(e) => {
                // Return path: back to available unconditionally, whatever the
                // item was marked in the interim (accepted simplification).
                self.state = StockState::from_shelf(self.on_shelf() + e.quantity);
                self.on_loan = self.on_loan.saturating_sub(e.quantity);
            }
            StockEvent::StockTransferred(e) => {
                self.store_id = Some(e.to_store_id);
            }
            StockEvent::StockAdjusted(e) => {
                let shelf = i64::from(self.on_shelf()) + e.delta;
                let shelf = u32::try_from(shelf.max(0)).unwrap_or(u32::MAX);
                self.state = match self.state {
                    StockState::Maintenance { .. } => StockState::Maintenance { on_shelf: shelf },
                    StockState::Damaged { .. } => StockState::Damaged { on_shelf: shelf },
                    StockState::Retired => StockState::Retired,
                    StockState::Available(_) | StockState::Reserved => {
                        StockState::from_shelf(shelf)
                    }
                };
            }
            StockEvent::SentToMaintenance(_) => {
                self.state = StockState::Maintenance {
                    on_shelf: self.on_shelf(),
                };
            }
            StockEvent::MarkedDamaged(_) => {
                self.state = StockState::Damaged {
                    on_shelf: self.on_shelf(),
                };
            }
            StockEvent::ReturnedToService(_) => {
                self.state = StockState::from_shelf(self.on_shelf());
            }
            StockEvent::ItemRetired(_) => {
                self.state = StockState::Retired;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::RegisterItem(cmd) => self.handle_register(cmd),
            StockCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            StockCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            StockCommand::TransferStock(cmd) => self.handle_transfer(cmd),
            StockCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            StockCommand::MarkMaintenance(cmd) => self.handle_maintenance(cmd),
            StockCommand::MarkDamaged(cmd) => self.handle_damaged(cmd),
            StockCommand::ReturnToService(cmd) => self.handle_return_to_service(cmd),
            StockCommand::RetireItem(cmd) => self.handle_retire(cmd),
        }
    }
}

impl StockItem {
    fn ensure_registered(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: ItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invalid_state("item_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_retired(&self) -> Result<(), DomainError> {
        if self.state.is_retired() {
            return Err(DomainError::invalid_state("item is retired"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already registered"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if let Some(max) = cmd.max_level {
            if max < cmd.min_level {
                return Err(DomainError::validation("max_level below min_level"));
            }
        }
        Ok(vec![StockEvent::ItemRegistered(ItemRegistered {
            item_id: cmd.item_id,
            store_id: cmd.store_id,
            name: cmd.name.clone(),
            initial_quantity: cmd.initial_quantity,
            min_level: cmd.min_level,
            max_level: cmd.max_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }

        // Reserved is "available with zero on the shelf": a reserve against it
        // is an over-ask, not an unavailability.
        let available = match self.state {
            StockState::Available(q) => q.get(),
            StockState::Reserved => 0,
            _ => return Err(DomainError::item_unavailable(self.state.label())),
        };

        if cmd.quantity > available {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        Ok(vec![StockEvent::StockReserved(StockReserved {
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }

        Ok(vec![StockEvent::StockReleased(StockReleased {
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &TransferStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if self.store_id == Some(cmd.to_store_id) {
            return Err(DomainError::validation(
                "destination store equals current store",
            ));
        }

        // Same preconditions as the reserve leg at the source store.
        let available = match self.state {
            StockState::Available(q) => q.get(),
            StockState::Reserved => 0,
            _ => return Err(DomainError::item_unavailable(self.state.label())),
        };
        if cmd.quantity > available {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        let Some(from_store_id) = self.store_id else {
            return Err(DomainError::invalid_state("item has no home store"));
        };

        Ok(vec![StockEvent::StockTransferred(StockTransferred {
            item_id: cmd.item_id,
            from_store_id,
            to_store_id: cmd.to_store_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;
        self.ensure_not_retired()?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let shelf = i64::from(self.on_shelf());
        if shelf + cmd.delta < 0 {
            let requested = u32::try_from(-cmd.delta).unwrap_or(u32::MAX);
            return Err(DomainError::insufficient_stock(requested, self.on_shelf()));
        }

        Ok(vec![StockEvent::StockAdjusted(StockAdjusted {
            item_id: cmd.item_id,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_maintenance(&self, cmd: &MarkMaintenance) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;
        self.ensure_not_retired()?;

        if matches!(self.state, StockState::Maintenance { .. }) {
            return Err(DomainError::invalid_state("item already in maintenance"));
        }

        Ok(vec![StockEvent::SentToMaintenance(SentToMaintenance {
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_damaged(&self, cmd: &MarkDamaged) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;
        self.ensure_not_retired()?;

        if matches!(self.state, StockState::Damaged { .. }) {
            return Err(DomainError::invalid_state("item already marked damaged"));
        }

        Ok(vec![StockEvent::MarkedDamaged(MarkedDamaged {
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return_to_service(
        &self,
        cmd: &ReturnToService,
    ) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;

        if !matches!(
            self.state,
            StockState::Maintenance { .. } | StockState::Damaged { .. }
        ) {
            return Err(DomainError::invalid_state(
                "item is not in maintenance or damaged",
            ));
        }

        Ok(vec![StockEvent::ReturnedToService(ReturnedToService {
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retire(&self, cmd: &RetireItem) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_registered()?;
        self.ensure_item_id(cmd.item_id)?;
        self.ensure_not_retired()?;

        Ok(vec![StockEvent::ItemRetired(ItemRetired {
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
