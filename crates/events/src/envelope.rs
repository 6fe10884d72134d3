use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, StockEventId};

/// Envelope for a committed ledger event, carrying stream metadata.
///
/// Notes:
/// - the stream is the product: `revision` increases by one per event of
///   that product, `event_id` increases across the whole ledger.
/// - `payload` is the committed record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: StockEventId,
    product_id: ProductId,
    event_type: String,

    /// Position in the product stream (1-based).
    revision: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: StockEventId,
        product_id: ProductId,
        event_type: impl Into<String>,
        revision: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            product_id,
            event_type: event_type.into(),
            revision,
            payload,
        }
    }

    pub fn event_id(&self) -> StockEventId {
        self.event_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
