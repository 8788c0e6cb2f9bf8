//! Subscription Index
//!
//! Reverse index from product id to the connections that care about it.
//! Fan-out reads this instead of scanning every connection.

use dashmap::DashMap;
use std::collections::HashSet;

/// Product -> connection id index
///
/// `subscribers` drives stock/price updates, `watchers` drives price-drop
/// alerts. Both maps drop a product entry as soon as its set empties, so
/// idle products cost nothing.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    subscribers: DashMap<String, HashSet<String>>,
    watchers: DashMap<String, HashSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Idempotent.
    pub fn subscribe(&self, product_id: &str, conn_id: &str) {
        self.subscribers
            .entry(product_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    /// Remove a subscription. Unknown pairs are a no-op.
    pub fn unsubscribe(&self, product_id: &str, conn_id: &str) {
        if let Some(mut set) = self.subscribers.get_mut(product_id) {
            set.remove(conn_id);
            if set.is_empty() {
                drop(set);
                self.subscribers.remove(product_id);
            }
        }
    }

    /// Register a price watcher. Idempotent.
    pub fn watch(&self, product_id: &str, conn_id: &str) {
        self.watchers
            .entry(product_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    /// Connection ids subscribed to a product
    pub fn subscribers_of(&self, product_id: &str) -> Vec<String> {
        self.subscribers
            .get(product_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Connection ids watching a product's price
    pub fn watchers_of(&self, product_id: &str) -> Vec<String> {
        self.watchers
            .get(product_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Purge a connection from every product entry
    pub fn remove_connection(&self, conn_id: &str) {
        for map in [&self.subscribers, &self.watchers] {
            map.retain(|_, set| {
                set.remove(conn_id);
                !set.is_empty()
            });
        }
    }

    /// Number of products with at least one subscriber
    pub fn product_count(&self) -> usize {
        self.subscribers.len()
    }
}
