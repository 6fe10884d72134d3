use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use stockledger_core::{LocationId, ProductId};
use stockledger_infra::{HistoryFilter, ReceiveOutcome, ShipOutcome, StockLevelReport};
use stockledger_inventory::{ChangeType, LocationBalance, StockEvent};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /stock/receive` and `POST /stock/ship`.
#[derive(Debug, Deserialize)]
pub struct StockMovementRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub safety_stock: i64,
}

/// Query string of the history endpoints.
///
/// `change_type` is only read by `/stock/history`; the receiving/shipping
/// shortcuts fix it.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub change_type: Option<String>,
    pub product_id: Option<ProductId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn into_filter(self, change_type: ChangeType) -> HistoryFilter {
        let mut filter = HistoryFilter::new(change_type).between(self.from, self.to);
        if let Some(product_id) = self.product_id {
            filter = filter.for_product(product_id);
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct LocationBalancesResponse {
    pub product_id: ProductId,
    pub total_quantity: i64,
    pub balances: Vec<LocationBalance>,
}

impl LocationBalancesResponse {
    pub fn new(product_id: ProductId, balances: Vec<LocationBalance>) -> Self {
        Self {
            product_id,
            total_quantity: balances.iter().map(|b| b.quantity).sum(),
            balances,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub change_type: ChangeType,
    pub count: usize,
    pub events: Vec<StockEvent>,
}

impl HistoryResponse {
    pub fn new(change_type: ChangeType, events: Vec<StockEvent>) -> Self {
        Self {
            change_type,
            count: events.len(),
            events,
        }
    }
}

pub fn receive_to_json(outcome: &ReceiveOutcome) -> serde_json::Value {
    json!({
        "product_id": outcome.event.product_id,
        "location_id": outcome.event.location_id,
        "old_stock": outcome.old_total,
        "new_stock": outcome.new_total,
        "location_stock": outcome.event.location_quantity,
        "quantity_received": outcome.quantity_received,
        "event_id": outcome.event.event_id,
    })
}

pub fn ship_to_json(outcome: &ShipOutcome) -> serde_json::Value {
    json!({
        "product_id": outcome.event.product_id,
        "location_id": outcome.event.location_id,
        "old_stock": outcome.old_total,
        "new_stock": outcome.new_total,
        "location_stock": outcome.event.location_quantity,
        "quantity_shipped": outcome.quantity_shipped,
        "event_id": outcome.event.event_id,
    })
}

pub fn stock_level_to_json(level: &StockLevelReport) -> serde_json::Value {
    json!({
        "product_id": level.product.product_id,
        "name": level.product.name,
        "safety_stock": level.product.safety_stock,
        "total_quantity": level.total_quantity,
        "status": level.status,
    })
}
