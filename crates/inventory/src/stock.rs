use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, LocationId, ProductId};
use stockledger_events::Event;

/// Kind of stock-changing ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Receive,
    Ship,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Receive => "receive",
            ChangeType::Ship => "ship",
        }
    }

    /// Signed effect of a movement of `quantity` units on a balance.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            ChangeType::Receive => quantity,
            ChangeType::Ship => -quantity,
        }
    }
}

impl core::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ChangeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "receive" | "receiving" => Ok(ChangeType::Receive),
            "ship" | "shipping" => Ok(ChangeType::Ship),
            other => Err(DomainError::invalid_argument(format!(
                "unknown change type '{other}' (expected receive or ship)"
            ))),
        }
    }
}

/// Quantity of a product held at one location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationBalance {
    pub location_id: LocationId,
    pub quantity: i64,
}

/// Aggregate root: the stock position of one product across its locations.
///
/// The per-location balances are the source of truth; the product total is
/// always derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    product_id: ProductId,
    balances: BTreeMap<LocationId, i64>,
    revision: u64,
}

impl ProductStock {
    /// A product with no balance rows and no recorded events.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            balances: BTreeMap::new(),
            revision: 0,
        }
    }

    /// Rebuild the position from persisted balance rows.
    ///
    /// `revision` is the number of ledger events already recorded for the
    /// product.
    pub fn restore(
        product_id: ProductId,
        balances: impl IntoIterator<Item = LocationBalance>,
        revision: u64,
    ) -> Self {
        Self {
            product_id,
            balances: balances
                .into_iter()
                .map(|b| (b.location_id, b.quantity))
                .collect(),
            revision,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Sum of all location balances.
    pub fn total(&self) -> i64 {
        self.balances.values().sum()
    }

    /// Quantity at `location_id`, `None` if the product never had a balance row there.
    pub fn location_quantity(&self, location_id: LocationId) -> Option<i64> {
        self.balances.get(&location_id).copied()
    }

    /// Balance rows ordered by location.
    pub fn balances(&self) -> Vec<LocationBalance> {
        self.balances
            .iter()
            .map(|(location_id, quantity)| LocationBalance {
                location_id: *location_id,
                quantity: *quantity,
            })
            .collect()
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.revision
    }
}

/// Command: ReceiveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipStock {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    Receive(ReceiveStock),
    Ship(ShipStock),
}

/// Event: StockReceived.
///
/// `location_quantity` and `resulting_quantity` are the balances *after* the
/// movement (at the location and across all locations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub location_quantity: i64,
    pub resulting_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShipped {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub location_quantity: i64,
    pub resulting_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockMovement {
    Received(StockReceived),
    Shipped(StockShipped),
}

impl StockMovement {
    pub fn change_type(&self) -> ChangeType {
        match self {
            StockMovement::Received(_) => ChangeType::Receive,
            StockMovement::Shipped(_) => ChangeType::Ship,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            StockMovement::Received(e) => e.product_id,
            StockMovement::Shipped(e) => e.product_id,
        }
    }

    pub fn location_id(&self) -> LocationId {
        match self {
            StockMovement::Received(e) => e.location_id,
            StockMovement::Shipped(e) => e.location_id,
        }
    }

    pub fn quantity(&self) -> i64 {
        match self {
            StockMovement::Received(e) => e.quantity,
            StockMovement::Shipped(e) => e.quantity,
        }
    }

    pub fn location_quantity(&self) -> i64 {
        match self {
            StockMovement::Received(e) => e.location_quantity,
            StockMovement::Shipped(e) => e.location_quantity,
        }
    }

    pub fn resulting_quantity(&self) -> i64 {
        match self {
            StockMovement::Received(e) => e.resulting_quantity,
            StockMovement::Shipped(e) => e.resulting_quantity,
        }
    }
}

impl Event for StockMovement {
    fn event_type(&self) -> &'static str {
        match self {
            StockMovement::Received(_) => "stock.received",
            StockMovement::Shipped(_) => "stock.shipped",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockMovement::Received(e) => e.occurred_at,
            StockMovement::Shipped(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = StockCommand;
    type Event = StockMovement;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        // Movements carry post-movement balances, so replay sets rather than adds.
        self.balances
            .insert(event.location_id(), event.location_quantity());

        // Deterministic revision tracking: +1 per applied event.
        self.revision += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Receive(cmd) => self.handle_receive(cmd),
            StockCommand::Ship(cmd) => self.handle_ship(cmd),
        }
    }
}

impl ProductStock {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.product_id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockMovement>, DomainError> {
        ensure_positive(cmd.quantity)?;
        self.ensure_product_id(cmd.product_id)?;

        let current = self.location_quantity(cmd.location_id).unwrap_or(0);
        let location_quantity = current
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::invalid_argument("quantity overflows location balance"))?;
        let resulting_quantity = self
            .total()
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::invalid_argument("quantity overflows product total"))?;

        Ok(vec![StockMovement::Received(StockReceived {
            product_id: cmd.product_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            location_quantity,
            resulting_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipStock) -> Result<Vec<StockMovement>, DomainError> {
        ensure_positive(cmd.quantity)?;
        self.ensure_product_id(cmd.product_id)?;

        let Some(available) = self.location_quantity(cmd.location_id) else {
            return Err(DomainError::not_found(format!(
                "no stock of product {} at location {}",
                cmd.product_id, cmd.location_id
            )));
        };

        if cmd.quantity > available {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        Ok(vec![StockMovement::Shipped(StockShipped {
            product_id: cmd.product_id,
            location_id: cmd.location_id,
            quantity: cmd.quantity,
            location_quantity: available - cmd.quantity,
            resulting_quantity: self.total() - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Reject zero and negative movement quantities.
pub fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
    if quantity <= 0 {
        return Err(DomainError::invalid_argument(format!(
            "quantity must be greater than zero (got {quantity})"
        )));
    }
    Ok(())
}
