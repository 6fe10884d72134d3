use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, ProductId, StockEventId};
use stockledger_events::Event;

use crate::stock::{ChangeType, StockMovement};

/// A committed ledger entry. Append-only: never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEvent {
    pub event_id: StockEventId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub change_type: ChangeType,
    /// Always positive; the direction comes from `change_type`.
    pub quantity_changed: i64,
    /// Balance at `location_id` after the event.
    pub location_quantity: i64,
    /// Product total across all locations after the event.
    pub resulting_quantity: i64,
    /// Position in the product's stream (1-based).
    pub revision: u64,
    pub occurred_at: DateTime<Utc>,
}

impl StockEvent {
    /// Turn a decided movement into the record stored at `event_id`/`revision`.
    pub fn record(event_id: StockEventId, revision: u64, movement: &StockMovement) -> Self {
        Self {
            event_id,
            product_id: movement.product_id(),
            location_id: movement.location_id(),
            change_type: movement.change_type(),
            quantity_changed: movement.quantity(),
            location_quantity: movement.location_quantity(),
            resulting_quantity: movement.resulting_quantity(),
            revision,
            occurred_at: movement.occurred_at(),
        }
    }

    /// Total before this event was applied.
    pub fn previous_quantity(&self) -> i64 {
        self.resulting_quantity - self.change_type.signed(self.quantity_changed)
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self.change_type {
            ChangeType::Receive => "stock.received",
            ChangeType::Ship => "stock.shipped",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
