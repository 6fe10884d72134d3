//! Infrastructure layer: stock storage backends and the ledger service.

pub mod ledger;
pub mod store;


pub use ledger::{LedgerError, ReceiveOutcome, ShipOutcome, StockLedger, StockLevelReport};
pub use store::{
    HistoryFilter, InMemoryStockStore, PostgresStockStore, StockLevel, StockStore, StockUnit,
    StoreError,
};
