use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockledger_core::{Aggregate, AggregateRoot, ProductId, StockEventId};
use stockledger_inventory::{
    LocationBalance, NewProduct, Product, ProductStock, StockEvent, StockMovement,
};

use super::{HistoryFilter, StockLevel, StockStore, StockUnit, StoreError};

#[derive(Debug, Clone)]
struct ProductEntry {
    product: Product,
    stock: Arc<Mutex<ProductStock>>,
}

/// In-memory stock store.
///
/// Intended for tests/dev. Each product's position sits behind its own async
/// mutex; a [`StockUnit`] owns the guard, so units for different products
/// never contend.
#[derive(Debug)]
pub struct InMemoryStockStore {
    products: RwLock<BTreeMap<ProductId, ProductEntry>>,
    log: Arc<RwLock<Vec<StockEvent>>>,
    next_product_id: AtomicI64,
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self {
            products: RwLock::new(BTreeMap::new()),
            log: Arc::new(RwLock::new(Vec::new())),
            next_product_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, product_id: ProductId) -> Result<Option<ProductEntry>, StoreError> {
        let products = self
            .products
            .read()
            .map_err(|_| StoreError::Unavailable("product map lock poisoned".to_string()))?;
        Ok(products.get(&product_id).cloned())
    }

    fn entries(&self) -> Result<Vec<ProductEntry>, StoreError> {
        let products = self
            .products
            .read()
            .map_err(|_| StoreError::Unavailable("product map lock poisoned".to_string()))?;
        Ok(products.values().cloned().collect())
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn register_product(&self, draft: NewProduct) -> Result<Product, StoreError> {
        let product_id = ProductId::new(self.next_product_id.fetch_add(1, Ordering::SeqCst));
        let product = draft.into_product(product_id);

        let mut products = self
            .products
            .write()
            .map_err(|_| StoreError::Unavailable("product map lock poisoned".to_string()))?;
        products.insert(
            product_id,
            ProductEntry {
                product: product.clone(),
                stock: Arc::new(Mutex::new(ProductStock::empty(product_id))),
            },
        );

        Ok(product)
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.entry(product_id)?.map(|e| e.product))
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        let entries = self.entries()?;
        let mut levels = Vec::with_capacity(entries.len());
        for entry in entries {
            let total_quantity = entry.stock.lock().await.total();
            levels.push(StockLevel {
                product: entry.product,
                total_quantity,
            });
        }
        Ok(levels)
    }

    async fn stock_level(&self, product_id: ProductId) -> Result<Option<StockLevel>, StoreError> {
        let Some(entry) = self.entry(product_id)? else {
            return Ok(None);
        };
        let total_quantity = entry.stock.lock().await.total();
        Ok(Some(StockLevel {
            product: entry.product,
            total_quantity,
        }))
    }

    async fn lock_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Box<dyn StockUnit>>, StoreError> {
        let Some(entry) = self.entry(product_id)? else {
            return Ok(None);
        };

        let guard = entry.stock.lock_owned().await;

        Ok(Some(Box::new(InMemoryStockUnit {
            guard,
            log: Arc::clone(&self.log),
        })))
    }

    async fn location_balances(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Vec<LocationBalance>>, StoreError> {
        let Some(entry) = self.entry(product_id)? else {
            return Ok(None);
        };
        let balances = entry.stock.lock().await.balances();
        Ok(Some(balances))
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<StockEvent>, StoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".to_string()))?;

        let matching = log.iter().filter(|e| filter.matches(e)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit as usize).collect(),
            None => matching.collect(),
        })
    }
}

/// Holds the product's mutex until committed or dropped.
///
/// The position is only written back through the guard once the ledger entry
/// is appended, so a dropped unit leaves no trace.
struct InMemoryStockUnit {
    guard: OwnedMutexGuard<ProductStock>,
    log: Arc<RwLock<Vec<StockEvent>>>,
}

#[async_trait]
impl StockUnit for InMemoryStockUnit {
    fn position(&self) -> &ProductStock {
        &self.guard
    }

    async fn commit(self: Box<Self>, movement: &StockMovement) -> Result<StockEvent, StoreError> {
        let mut unit = *self;

        if movement.product_id() != unit.guard.product_id() {
            return Err(StoreError::Constraint(format!(
                "movement for product {} committed on unit for product {}",
                movement.product_id(),
                unit.guard.product_id()
            )));
        }
        if movement.location_quantity() < 0 {
            return Err(StoreError::Constraint(
                "location quantity cannot be negative".to_string(),
            ));
        }

        let mut next = (*unit.guard).clone();
        next.apply(movement);

        // Id assignment and append share the log lock, so ids follow commit order.
        let event = {
            let mut log = unit
                .log
                .write()
                .map_err(|_| StoreError::Unavailable("ledger lock poisoned".to_string()))?;
            let event_id = StockEventId::new(log.last().map(|e| e.event_id.get()).unwrap_or(0) + 1);
            let event = StockEvent::record(event_id, next.version(), movement);
            log.push(event.clone());
            event
        };

        *unit.guard = next;
        Ok(event)
    }
}
