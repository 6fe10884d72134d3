//! Stock storage boundary.
//!
//! The ledger never reads-then-writes balances directly. It asks the store for
//! a [`StockUnit`]: an exclusive, scoped hold on one product's stock position.
//! While the unit is alive no other unit for that product can be acquired, so
//! the sufficiency check and the write happen against the same state.
//!
//! ## Unit lifecycle
//!
//! ```text
//! lock_product(id) ──► StockUnit ──► position() / handle() ──► commit(movement)
//!                          │
//!                          └── dropped without commit ──► rolled back, lock released
//! ```
//!
//! Committing writes the location balance, the product total and one ledger
//! entry as a single atomic step and returns the stored entry.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockledger_core::ProductId;
use stockledger_inventory::{
    ChangeType, LocationBalance, NewProduct, Product, ProductStock, StockEvent, StockMovement,
    StockStatus,
};

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Storage failure.
///
/// Infrastructure errors only; business rejections never reach the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not complete the operation (connection, pool,
    /// IO, lock poisoning).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded into domain types.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// A storage-level constraint rejected the write.
    #[error("storage constraint violated: {0}")]
    Constraint(String),
}

/// History query (receiving-history / shipping-history).
///
/// Results are always ascending by `event_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub change_type: ChangeType,
    pub product_id: Option<ProductId>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl HistoryFilter {
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            product_id: None,
            occurred_after: None,
            occurred_before: None,
            limit: None,
        }
    }

    pub fn for_product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn between(
        mut self,
        occurred_after: Option<DateTime<Utc>>,
        occurred_before: Option<DateTime<Utc>>,
    ) -> Self {
        self.occurred_after = occurred_after;
        self.occurred_before = occurred_before;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` passes every predicate except `limit`.
    pub fn matches(&self, event: &StockEvent) -> bool {
        event.change_type == self.change_type
            && self.product_id.is_none_or(|id| event.product_id == id)
            && self.occurred_after.is_none_or(|t| event.occurred_at >= t)
            && self.occurred_before.is_none_or(|t| event.occurred_at <= t)
    }
}

/// A catalog product with its current total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub product: Product,
    pub total_quantity: i64,
}

impl StockLevel {
    pub fn status(&self) -> StockStatus {
        StockStatus::classify(self.total_quantity, self.product.safety_stock)
    }
}

/// Exclusive, scoped hold on one product's stock position.
///
/// Dropping a unit without committing discards it and releases the hold.
#[async_trait]
pub trait StockUnit: Send {
    /// Position as of lock acquisition.
    fn position(&self) -> &ProductStock;

    /// Persist `movement` atomically and release the hold.
    ///
    /// The movement must have been decided against [`StockUnit::position`].
    async fn commit(self: Box<Self>, movement: &StockMovement) -> Result<StockEvent, StoreError>;
}

/// Persistent store for products, location balances and the ledger.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn register_product(&self, draft: NewProduct) -> Result<Product, StoreError>;

    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Every product with its total, ordered by product id.
    async fn stock_levels(&self) -> Result<Vec<StockLevel>, StoreError>;

    async fn stock_level(&self, product_id: ProductId) -> Result<Option<StockLevel>, StoreError>;

    /// Acquire the exclusive unit for `product_id`, waiting for any holder to
    /// finish. `None` when the product does not exist.
    async fn lock_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Box<dyn StockUnit>>, StoreError>;

    /// Committed balances ordered by location; `None` when the product does not exist.
    async fn location_balances(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Vec<LocationBalance>>, StoreError>;

    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<StockEvent>, StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn register_product(&self, draft: NewProduct) -> Result<Product, StoreError> {
        (**self).register_product(draft).await
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(product_id).await
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        (**self).stock_levels().await
    }

    async fn stock_level(&self, product_id: ProductId) -> Result<Option<StockLevel>, StoreError> {
        (**self).stock_level(product_id).await
    }

    async fn lock_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Box<dyn StockUnit>>, StoreError> {
        (**self).lock_product(product_id).await
    }

    async fn location_balances(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Vec<LocationBalance>>, StoreError> {
        (**self).location_balances(product_id).await
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<StockEvent>, StoreError> {
        (**self).history(filter).await
    }
}
