//! Service wiring: storage backend, ledger, event bus and the realtime bridge.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use stockledger_infra::{InMemoryStockStore, PostgresStockStore, StockLedger, StockStore};
use stockledger_inventory::StockEvent;

use crate::config::StorageConfig;

pub type StockBus = InMemoryEventBus<EventEnvelope<StockEvent>>;

/// The ledger as the API runs it: storage chosen at startup, in-process bus.
pub type StockLedgerService = StockLedger<Arc<dyn StockStore>, Arc<StockBus>>;

/// Realtime message broadcast via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

pub struct AppServices {
    ledger: StockLedgerService,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    pub fn ledger(&self) -> &StockLedgerService {
        &self.ledger
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

pub async fn build_services(storage: &StorageConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn StockStore> = match storage {
        StorageConfig::InMemory => Arc::new(InMemoryStockStore::new()),
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresStockStore::connect(database_url, *max_connections)
                .await
                .context("failed to connect to Postgres")?;
            store
                .ensure_schema()
                .await
                .context("failed to bootstrap the stock ledger schema")?;
            Arc::new(store)
        }
    };

    let bus: Arc<StockBus> = Arc::new(InMemoryEventBus::new());

    // Realtime channel (SSE): lossy broadcast, never back-pressures the ledger.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);
    spawn_realtime_bridge(bus.subscribe(), realtime_tx.clone())?;

    tracing::info!(storage = storage.kind(), "stock ledger services ready");

    Ok(AppServices {
        ledger: StockLedger::new(store, bus),
        realtime_tx,
    })
}

/// Forward committed ledger events from the bus to the broadcast channel.
///
/// Runs on its own thread because bus subscriptions block. The thread exits
/// once the bus (and with it every sender) is dropped.
fn spawn_realtime_bridge(
    sub: Subscription<EventEnvelope<StockEvent>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("stock-realtime-bridge".to_string())
        .spawn(move || {
            while let Ok(envelope) = sub.recv() {
                let payload = match serde_json::to_value(envelope.payload()) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(event_id = %envelope.event_id(), error = %e, "failed to encode stock event");
                        continue;
                    }
                };

                // No receivers is not an error: nobody is streaming right now.
                let _ = realtime_tx.send(RealtimeMessage {
                    topic: envelope.event_type().to_string(),
                    payload,
                });
            }
            tracing::debug!("event bus closed; realtime bridge stopped");
        })
        .context("failed to spawn realtime bridge thread")?;
    Ok(())
}

/// Build the SSE stream served on `/stream`.
///
/// Slow clients that lag behind the broadcast buffer silently miss messages;
/// history remains the authoritative record.
pub fn stock_sse_stream(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        Err(_lagged) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
