//! Postgres-backed stock store.
//!
//! ## Locking
//!
//! `lock_product` opens a transaction and takes `SELECT … FOR UPDATE` on the
//! product row and then on its balance rows. Every writer goes through the
//! product row first, so two units for the same product are strictly ordered
//! and the second one reads the balances the first one committed. Units for
//! different products touch disjoint rows and run in parallel.
//!
//! The transaction lives inside the returned unit. Dropping the unit without
//! committing rolls it back (sqlx rolls back un-finished transactions on drop)
//! and releases the row locks.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (check violation) | `23514` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (other) | Any other | `Unavailable` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Unavailable` |
//! | ColumnDecode / Decode / ColumnNotFound | N/A | `Corrupt` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stockledger_core::{AggregateRoot, LocationId, ProductId, StockEventId};
use stockledger_inventory::{
    ChangeType, LocationBalance, NewProduct, Product, ProductStock, StockEvent, StockMovement,
};

use super::{HistoryFilter, StockLevel, StockStore, StockUnit, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables, indexes and the append-only trigger if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self, draft), fields(name = draft.name()), err)]
    async fn register_product(&self, draft: NewProduct) -> Result<Product, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO products (name, safety_stock)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(draft.name())
        .bind(draft.safety_stock())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_product", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("register_product", e))?;
        Ok(draft.into_product(ProductId::new(id)))
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn product(&self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.stock_level(product_id).await?.map(|level| level.product))
    }

    #[instrument(skip(self), err)]
    async fn stock_levels(&self) -> Result<Vec<StockLevel>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, safety_stock, total_stock_quantity
            FROM products
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_levels", e))?;

        rows.iter()
            .map(stock_level_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("stock_levels", e))
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn stock_level(&self, product_id: ProductId) -> Result<Option<StockLevel>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, safety_stock, total_stock_quantity
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_level", e))?;

        row.as_ref()
            .map(stock_level_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("stock_level", e))
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn lock_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Box<dyn StockUnit>>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let Some(product_row) = sqlx::query(
            "SELECT ledger_revision FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(product_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_product", e))?
        else {
            // tx rolls back on drop
            return Ok(None);
        };

        let revision: i64 = product_row
            .try_get("ledger_revision")
            .map_err(|e| map_sqlx_error("lock_product", e))?;

        let balance_rows = sqlx::query(
            r#"
            SELECT location_id, quantity
            FROM location_balances
            WHERE product_id = $1
            ORDER BY location_id ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_balances", e))?;

        let balances = balance_rows
            .iter()
            .map(balance_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("lock_balances", e))?;

        let revision = u64::try_from(revision)
            .map_err(|_| StoreError::Corrupt(format!("negative ledger_revision {revision}")))?;

        Ok(Some(Box::new(PostgresStockUnit {
            tx,
            position: ProductStock::restore(product_id, balances, revision),
        })))
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn location_balances(
        &self,
        product_id: ProductId,
    ) -> Result<Option<Vec<LocationBalance>>, StoreError> {
        // One statement so the existence check and the balances share a snapshot.
        let rows = sqlx::query(
            r#"
            SELECT b.location_id, b.quantity
            FROM products p
            LEFT JOIN location_balances b ON b.product_id = p.id
            WHERE p.id = $1
            ORDER BY b.location_id ASC
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("location_balances", e))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut balances = Vec::with_capacity(rows.len());
        for row in &rows {
            let location_id: Option<i64> = row
                .try_get("location_id")
                .map_err(|e| map_sqlx_error("location_balances", e))?;
            // A product without balance rows yields a single all-NULL row.
            if location_id.is_none() {
                continue;
            }
            balances.push(balance_from_row(row).map_err(|e| map_sqlx_error("location_balances", e))?);
        }
        Ok(Some(balances))
    }

    #[instrument(skip(self), fields(change_type = %filter.change_type), err)]
    async fn history(&self, filter: &HistoryFilter) -> Result<Vec<StockEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                product_id,
                location_id,
                change_type,
                quantity_changed,
                location_quantity,
                resulting_quantity,
                revision,
                occurred_at
            FROM stock_events
            WHERE change_type = $1
                AND ($2::bigint IS NULL OR product_id = $2)
                AND ($3::timestamptz IS NULL OR occurred_at >= $3)
                AND ($4::timestamptz IS NULL OR occurred_at <= $4)
            ORDER BY event_id ASC
            LIMIT $5
            "#,
        )
        .bind(filter.change_type.as_str())
        .bind(filter.product_id.map(|id| id.get()))
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .bind(filter.limit.map(i64::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let stored =
                StockEventRow::from_row(row).map_err(|e| map_sqlx_error("history", e))?;
            events.push(stored.try_into()?);
        }
        Ok(events)
    }
}

/// Open transaction holding the product and balance row locks.
struct PostgresStockUnit {
    tx: Transaction<'static, Postgres>,
    position: ProductStock,
}

#[async_trait]
impl StockUnit for PostgresStockUnit {
    fn position(&self) -> &ProductStock {
        &self.position
    }

    #[instrument(
        skip(self, movement),
        fields(
            product_id = %movement.product_id(),
            location_id = %movement.location_id(),
            change_type = %movement.change_type()
        ),
        err
    )]
    async fn commit(self: Box<Self>, movement: &StockMovement) -> Result<StockEvent, StoreError> {
        let PostgresStockUnit { mut tx, position } = *self;

        if movement.product_id() != position.product_id() {
            return Err(StoreError::Constraint(format!(
                "movement for product {} committed on unit for product {}",
                movement.product_id(),
                position.product_id()
            )));
        }

        let product_id = movement.product_id().get();
        let revision = position.version() + 1;

        sqlx::query(
            r#"
            INSERT INTO location_balances (product_id, location_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id, location_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = now()
            "#,
        )
        .bind(product_id)
        .bind(movement.location_id().get())
        .bind(movement.location_quantity())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_balance", e))?;

        sqlx::query(
            r#"
            UPDATE products
            SET total_stock_quantity = $2, ledger_revision = $3
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .bind(movement.resulting_quantity())
        .bind(revision as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_product_total", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO stock_events (
                product_id,
                location_id,
                change_type,
                quantity_changed,
                location_quantity,
                resulting_quantity,
                revision,
                occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING event_id
            "#,
        )
        .bind(product_id)
        .bind(movement.location_id().get())
        .bind(movement.change_type().as_str())
        .bind(movement.quantity())
        .bind(movement.location_quantity())
        .bind(movement.resulting_quantity())
        .bind(revision as i64)
        .bind(stockledger_events::Event::occurred_at(movement))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_stock_event", e))?;

        let event_id: i64 = row
            .try_get("event_id")
            .map_err(|e| map_sqlx_error("insert_stock_event", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(StockEvent::record(StockEventId::new(event_id), revision, movement))
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") | Some("23503") => StoreError::Constraint(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Corrupt(format!("failed to decode row in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn stock_level_from_row(row: &PgRow) -> Result<StockLevel, sqlx::Error> {
    Ok(StockLevel {
        product: Product {
            product_id: ProductId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            safety_stock: row.try_get("safety_stock")?,
        },
        total_quantity: row.try_get("total_stock_quantity")?,
    })
}

fn balance_from_row(row: &PgRow) -> Result<LocationBalance, sqlx::Error> {
    Ok(LocationBalance {
        location_id: LocationId::new(row.try_get("location_id")?),
        quantity: row.try_get("quantity")?,
    })
}

// SQLx row types

#[derive(Debug)]
struct StockEventRow {
    event_id: i64,
    product_id: i64,
    location_id: i64,
    change_type: String,
    quantity_changed: i64,
    location_quantity: i64,
    resulting_quantity: i64,
    revision: i64,
    occurred_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StockEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockEventRow {
            event_id: row.try_get("event_id")?,
            product_id: row.try_get("product_id")?,
            location_id: row.try_get("location_id")?,
            change_type: row.try_get("change_type")?,
            quantity_changed: row.try_get("quantity_changed")?,
            location_quantity: row.try_get("location_quantity")?,
            resulting_quantity: row.try_get("resulting_quantity")?,
            revision: row.try_get("revision")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl TryFrom<StockEventRow> for StockEvent {
    type Error = StoreError;

    fn try_from(row: StockEventRow) -> Result<Self, Self::Error> {
        let change_type: ChangeType = row
            .change_type
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("event {}: {}", row.event_id, e)))?;
        let revision = u64::try_from(row.revision).map_err(|_| {
            StoreError::Corrupt(format!("event {}: negative revision", row.event_id))
        })?;

        Ok(StockEvent {
            event_id: StockEventId::new(row.event_id),
            product_id: ProductId::new(row.product_id),
            location_id: LocationId::new(row.location_id),
            change_type,
            quantity_changed: row.quantity_changed,
            location_quantity: row.location_quantity,
            resulting_quantity: row.resulting_quantity,
            revision,
            occurred_at: row.occurred_at,
        })
    }
}
