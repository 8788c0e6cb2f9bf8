//! Reconciliation loop
//!
//! Outbound delivery drops frames rather than block the ledger, so a
//! subscriber can miss updates. Every cycle this worker re-reads the
//! products whose ledger changed inside the window and replays them
//! through the normal dispatch path. Alert crossings are computed from
//! each event's own previous/new pair, so a replayed event yields the
//! same alerts as the original, not new ones.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shared::util::now_millis;

use crate::db::repository::ProductRepository;
use crate::message::dispatcher::{BroadcastDispatcher, MutationEvent};

/// Periodic ledger re-broadcast worker
///
/// Registered as `TaskKind::Periodic` in `start_background_tasks()`.
pub struct Reconciler {
    products: ProductRepository,
    dispatcher: Arc<BroadcastDispatcher>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Reconciler {
    pub fn new(
        products: ProductRepository,
        dispatcher: Arc<BroadcastDispatcher>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            products,
            dispatcher,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Reconciler started");

        // The window starts at the last SUCCESSFUL cycle; a failed read
        // leaves it untouched so the next cycle covers the gap.
        let mut window_start = now_millis();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reconciler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.run_cycle(window_start).await {
                        Ok((cycle_start, replayed)) => {
                            window_start = cycle_start;
                            if replayed > 0 {
                                tracing::debug!(replayed, "Reconciliation cycle complete");
                            }
                        }
                        Err(e) => {
                            tracing::error!("Reconciliation cycle failed: {}", e);
                        }
                    }
                }
            }
        }

        tracing::info!("Reconciler stopped");
    }

    /// Replay one window. Returns the timestamp the next window starts at
    /// and the number of products replayed.
    pub async fn run_cycle(&self, window_start: i64) -> Result<(i64, usize), String> {
        let cycle_start = now_millis();
        let products = self
            .products
            .find_updated_since(window_start)
            .await
            .map_err(|e| e.to_string())?;

        let mut replayed = 0;
        for product in &products {
            let Some(product_id) = product.id.as_deref() else {
                continue;
            };

            let mut event = MutationEvent {
                product_id: product_id.to_string(),
                previous_stock: None,
                stock: None,
                previous_price: None,
                price: None,
            };

            // Previous values come from the latest history entry; a product
            // with no history inside the window has nothing to replay.
            if let Some(change) = product.stock_history.last()
                && change.timestamp >= window_start
            {
                event.previous_stock = Some(change.previous);
                event.stock = Some(change.new);
            }
            if let Some(change) = product.price_history.last()
                && change.timestamp >= window_start
            {
                event.previous_price = Some(change.previous);
                event.price = Some(change.new);
            }

            if event.stock.is_none() && event.price.is_none() {
                continue;
            }

            self.dispatcher.on_mutation(&event).await;
            replayed += 1;
        }

        Ok((cycle_start, replayed))
    }
}
