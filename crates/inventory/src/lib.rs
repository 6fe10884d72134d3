//! Inventory domain module.
//!
//! Business rules for warehouse stock, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage): the per-product stock position
//! aggregate, the ledger record it produces and the catalog entry types.

pub mod ledger;
pub mod product;
pub mod stock;

pub use ledger::StockEvent;
pub use product::{NewProduct, Product, StockStatus};
pub use stock::{
    ChangeType, LocationBalance, ProductStock, ReceiveStock, ShipStock, StockCommand,
    StockMovement, StockReceived, StockShipped, ensure_positive,
};
