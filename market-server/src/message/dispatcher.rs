//! Broadcast Dispatcher
//!
//! Turns ledger mutations into client notifications. Every mutation carries
//! its own previous/new pair, so alert decisions depend only on the event
//! itself and replaying an event (reconciliation does this) produces the
//! same alerts again instead of new ones.

use std::sync::Arc;

use rust_decimal::Decimal;
use shared::message::{
    AdminFeedPayload, BusMessage, PriceDropAlertPayload, PriceUpdatePayload, StockAlertPayload,
    StockUpdatePayload,
};
use shared::util::now_millis;

use super::registry::ConnectionRegistry;
use super::subscription::SubscriptionIndex;

/// One committed ledger mutation
///
/// Stock and price sides are independent; a checkout only fills the stock
/// pair, a repricing only the price pair.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub product_id: String,
    pub previous_stock: Option<i64>,
    pub stock: Option<i64>,
    pub previous_price: Option<Decimal>,
    pub price: Option<Decimal>,
}

impl MutationEvent {
    pub fn stock_change(product_id: &str, previous: i64, new: i64) -> Self {
        Self {
            product_id: product_id.to_string(),
            previous_stock: Some(previous),
            stock: Some(new),
            previous_price: None,
            price: None,
        }
    }

    pub fn price_change(product_id: &str, previous: Decimal, new: Decimal) -> Self {
        Self {
            product_id: product_id.to_string(),
            previous_stock: None,
            stock: None,
            previous_price: Some(previous),
            price: Some(new),
        }
    }
}

/// Fan-out engine
///
/// Delivery is best effort throughout: `registry.send` swallows failures
/// and the periodic reconciler re-broadcasts the current ledger state.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    index: Arc<SubscriptionIndex>,
    low_stock_threshold: i64,
}

impl BroadcastDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        index: Arc<SubscriptionIndex>,
        low_stock_threshold: i64,
    ) -> Self {
        Self {
            registry,
            index,
            low_stock_threshold,
        }
    }

    /// Dispatch one mutation to subscribers, watchers and the admin feed
    pub async fn on_mutation(&self, event: &MutationEvent) {
        if let (Some(previous), Some(stock)) = (event.previous_stock, event.stock) {
            self.dispatch_stock(&event.product_id, previous, stock).await;
        }
        if let (Some(previous), Some(price)) = (event.previous_price, event.price) {
            self.dispatch_price(&event.product_id, previous, price).await;
        }
        self.dispatch_admin_feed(event).await;
    }

    async fn dispatch_stock(&self, product_id: &str, previous: i64, stock: i64) {
        let msg = BusMessage::stock_update(&StockUpdatePayload {
            product_id: product_id.to_string(),
            stock,
            previous_stock: previous,
            available: stock > 0,
        });
        for conn_id in self.index.subscribers_of(product_id) {
            self.registry.send(&conn_id, &msg.clone().with_target(&conn_id)).await;
        }

        // Threshold alerts fire on the crossing, not on every event below it
        if previous > self.low_stock_threshold && stock <= self.low_stock_threshold && stock > 0 {
            let alert = BusMessage::low_stock_alert(&StockAlertPayload {
                product_id: product_id.to_string(),
                stock,
            });
            self.send_to_admins(&alert).await;
        }
        if previous > 0 && stock == 0 {
            let alert = BusMessage::out_of_stock_alert(&StockAlertPayload {
                product_id: product_id.to_string(),
                stock,
            });
            self.send_to_admins(&alert).await;
        }
    }

    async fn dispatch_price(&self, product_id: &str, previous: Decimal, price: Decimal) {
        let change_percent = if previous.is_zero() {
            Decimal::ZERO
        } else {
            ((price - previous) / previous * Decimal::ONE_HUNDRED).round_dp(2)
        };

        let msg = BusMessage::price_update(&PriceUpdatePayload {
            product_id: product_id.to_string(),
            price,
            previous_price: previous,
            change_percent,
        });
        for conn_id in self.index.subscribers_of(product_id) {
            self.registry.send(&conn_id, &msg.clone().with_target(&conn_id)).await;
        }

        // Price-drop alerts are unicast: each watcher has its own target,
        // and only a downward crossing of that target fires.
        for conn_id in self.index.watchers_of(product_id) {
            let Some(target) = self.registry.price_target(&conn_id, product_id) else {
                continue;
            };
            if price <= target && previous > target {
                let alert = BusMessage::price_drop_alert(&PriceDropAlertPayload {
                    product_id: product_id.to_string(),
                    new_price: price,
                    target_price: target,
                })
                .with_target(&conn_id);
                self.registry.send(&conn_id, &alert).await;
            }
        }
    }

    /// Admins see every mutation, subscribed or not
    async fn dispatch_admin_feed(&self, event: &MutationEvent) {
        let msg = BusMessage::admin_feed(&AdminFeedPayload {
            product_id: event.product_id.clone(),
            stock: event.stock,
            previous_stock: event.previous_stock,
            price: event.price,
            previous_price: event.previous_price,
            timestamp: now_millis(),
        });
        self.send_to_admins(&msg).await;
    }

    async fn send_to_admins(&self, msg: &BusMessage) {
        for conn_id in self.registry.admin_ids() {
            self.registry.send(&conn_id, &msg.clone().with_target(&conn_id)).await;
        }
    }
}
