//! Stock ledger service (application-level orchestration).
//!
//! Every stock-changing call runs the same pipeline:
//!
//! ```text
//! Receive / Ship
//!   ↓
//! 1. Validate quantity (no IO)
//!   ↓
//! 2. Acquire the product's StockUnit (exclusive; waits for other writers)
//!   ↓
//! 3. Handle command against the locked position (pure, produces one movement)
//!   ↓
//! 4. Commit balance + total + ledger entry atomically
//!   ↓
//! 5. Publish the committed entry to the bus
//! ```
//!
//! A rejection at step 1 or 3 drops the unit, which rolls back and releases
//! the lock; nothing is written. Publication happens strictly after commit and
//! its failure is logged, not returned: the entry is already durable and
//! subscribers can re-read history.
//!
//! The store releases its hold at commit, so steps 2 to 5 also run under an
//! in-process write gate per product. The next writer for that product cannot
//! commit until the previous entry is on the bus, which keeps publication in
//! revision order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use stockledger_core::{Aggregate, DomainError, LocationId, ProductId};
use stockledger_events::{Event, EventBus, EventEnvelope};
use stockledger_inventory::{
    LocationBalance, NewProduct, Product, ReceiveStock, ShipStock, StockCommand,
    StockEvent, StockStatus, ensure_positive,
};

use crate::store::{HistoryFilter, StockLevel, StockStore, StoreError};

/// Ledger failure, one variant per kind callers act on.
///
/// None of them is retried by the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error(transparent)]
    StorageUnavailable(#[from] StoreError),
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) | DomainError::InvalidId(msg) => {
                LedgerError::InvalidArgument(msg)
            }
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                requested,
                available,
            },
            // Only reachable when the store hands back a unit for another product.
            DomainError::InvariantViolation(msg) => {
                LedgerError::StorageUnavailable(StoreError::Corrupt(msg))
            }
        }
    }
}

/// Result of a successful Receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiveOutcome {
    pub old_total: i64,
    pub new_total: i64,
    pub quantity_received: i64,
    pub event: StockEvent,
}

/// Result of a successful Ship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipOutcome {
    pub old_total: i64,
    pub new_total: i64,
    pub quantity_shipped: i64,
    pub event: StockEvent,
}

/// Reporting view of one product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevelReport {
    pub product: Product,
    pub total_quantity: i64,
    pub status: StockStatus,
}

impl From<StockLevel> for StockLevelReport {
    fn from(level: StockLevel) -> Self {
        Self {
            status: level.status(),
            product: level.product,
            total_quantity: level.total_quantity,
        }
    }
}

/// Per-product gates ordering commit and publication within this process.
#[derive(Debug, Default)]
struct WriteGates {
    gates: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
}

impl WriteGates {
    fn gate(&self, product_id: ProductId) -> Result<Arc<tokio::sync::Mutex<()>>, LedgerError> {
        let mut gates = self.gates.lock().map_err(|_| {
            LedgerError::StorageUnavailable(StoreError::Unavailable(
                "write gate map poisoned".to_string(),
            ))
        })?;
        Ok(Arc::clone(gates.entry(product_id).or_default()))
    }
}

/// The stock ledger.
///
/// - `S`: storage (`StockStore`), the only path to balances and history
/// - `B`: bus receiving committed entries
pub struct StockLedger<S, B> {
    store: S,
    bus: B,
    gates: WriteGates,
}

impl<S, B> StockLedger<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            gates: WriteGates::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> StockLedger<S, B>
where
    S: StockStore,
    B: EventBus<EventEnvelope<StockEvent>>,
{
    #[instrument(skip(self), err)]
    pub async fn register_product(
        &self,
        name: &str,
        safety_stock: i64,
    ) -> Result<Product, LedgerError> {
        let draft = NewProduct::new(name, safety_stock)?;
        let product = self.store.register_product(draft).await?;
        info!(product_id = %product.product_id, "product registered");
        Ok(product)
    }

    pub async fn product(&self, product_id: ProductId) -> Result<Product, LedgerError> {
        self.store
            .product(product_id)
            .await?
            .ok_or_else(|| product_not_found(product_id))
    }

    /// Add `quantity` units at `location_id`, creating the balance row if needed.
    #[instrument(
        skip(self),
        fields(product_id = %product_id, location_id = %location_id),
        err
    )]
    pub async fn receive(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
    ) -> Result<ReceiveOutcome, LedgerError> {
        let (old_total, event) = self
            .execute(product_id, quantity, |occurred_at| {
                StockCommand::Receive(ReceiveStock {
                    product_id,
                    location_id,
                    quantity,
                    occurred_at,
                })
            })
            .await?;

        Ok(ReceiveOutcome {
            old_total,
            new_total: event.resulting_quantity,
            quantity_received: event.quantity_changed,
            event,
        })
    }

    /// Remove `quantity` units from `location_id`.
    ///
    /// Rejected as a whole when the location holds fewer than `quantity` units.
    #[instrument(
        skip(self),
        fields(product_id = %product_id, location_id = %location_id),
        err
    )]
    pub async fn ship(
        &self,
        product_id: ProductId,
        location_id: LocationId,
        quantity: i64,
    ) -> Result<ShipOutcome, LedgerError> {
        let (old_total, event) = self
            .execute(product_id, quantity, |occurred_at| {
                StockCommand::Ship(ShipStock {
                    product_id,
                    location_id,
                    quantity,
                    occurred_at,
                })
            })
            .await?;

        Ok(ShipOutcome {
            old_total,
            new_total: event.resulting_quantity,
            quantity_shipped: event.quantity_changed,
            event,
        })
    }

    pub async fn location_balances(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<LocationBalance>, LedgerError> {
        self.store
            .location_balances(product_id)
            .await?
            .ok_or_else(|| product_not_found(product_id))
    }

    pub async fn history(&self, filter: &HistoryFilter) -> Result<Vec<StockEvent>, LedgerError> {
        if let (Some(after), Some(before)) = (filter.occurred_after, filter.occurred_before) {
            if after > before {
                return Err(LedgerError::InvalidArgument(
                    "history range starts after it ends".to_string(),
                ));
            }
        }
        Ok(self.store.history(filter).await?)
    }

    pub async fn stock_levels(&self) -> Result<Vec<StockLevelReport>, LedgerError> {
        let levels = self.store.stock_levels().await?;
        Ok(levels.into_iter().map(StockLevelReport::from).collect())
    }

    pub async fn stock_level(&self, product_id: ProductId) -> Result<StockLevelReport, LedgerError> {
        self.store
            .stock_level(product_id)
            .await?
            .map(StockLevelReport::from)
            .ok_or_else(|| product_not_found(product_id))
    }

    /// Products whose status is not healthy.
    pub async fn low_stock(&self) -> Result<Vec<StockLevelReport>, LedgerError> {
        let mut levels = self.stock_levels().await?;
        levels.retain(|l| l.status.needs_attention());
        Ok(levels)
    }

    async fn execute(
        &self,
        product_id: ProductId,
        quantity: i64,
        command: impl FnOnce(chrono::DateTime<Utc>) -> StockCommand,
    ) -> Result<(i64, StockEvent), LedgerError> {
        ensure_positive(quantity)?;

        let unit = self
            .store
            .lock_product(product_id)
            .await?
            .ok_or_else(|| product_not_found(product_id))?;

        // Taken only for existing products, always while holding the unit.
        // Released after publish.
        let gate = self.gates.gate(product_id)?;
        let _gate = gate.lock_owned().await;

        // Stamped under the lock so timestamps follow commit order per product.
        // Microseconds: the precision Postgres keeps.
        let command = command(Utc::now().trunc_subsecs(6));

        let position = unit.position();
        let old_total = position.total();
        let Some(movement) = position.handle(&command)?.pop() else {
            return Err(LedgerError::StorageUnavailable(StoreError::Corrupt(
                "stock command produced no movement".to_string(),
            )));
        };

        let event = unit.commit(&movement).await?;

        info!(
            event_id = %event.event_id,
            change_type = %event.change_type,
            quantity = event.quantity_changed,
            resulting_quantity = event.resulting_quantity,
            "stock movement committed"
        );

        self.publish(&event);
        Ok((old_total, event))
    }

    fn publish(&self, event: &StockEvent) {
        let envelope = EventEnvelope::new(
            event.event_id,
            event.product_id,
            event.event_type(),
            event.revision,
            event.clone(),
        );
        if let Err(err) = self.bus.publish(envelope) {
            warn!(event_id = %event.event_id, error = ?err, "failed to publish committed stock event");
        }
    }
}

fn product_not_found(product_id: ProductId) -> LedgerError {
    LedgerError::NotFound(format!("product {product_id}"))
}
