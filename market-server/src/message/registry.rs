//! Connection Registry
//!
//! Owns every live client connection: identity, subscriptions, price-watch
//! targets and the transport to write to. Deregistration runs through one
//! path so a dropped connection never leaves entries behind in the
//! subscription index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rust_decimal::Decimal;
use shared::message::BusMessage;
use shared::util::now_millis;
use uuid::Uuid;

use super::subscription::SubscriptionIndex;
use super::transport::Transport;

/// Authenticated identity of a connection
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub is_admin: bool,
}

/// One live client connection
#[derive(Clone)]
pub struct ClientConnection {
    pub id: String,
    pub identity: Option<Identity>,
    /// Unix millis of registration
    pub connected_at: i64,
    /// Mirror of this connection's entries in the index, for cleanup
    pub subscriptions: HashSet<String>,
    /// Product id -> price-drop target
    pub price_watch: HashMap<String, Decimal>,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("connected_at", &self.connected_at)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

/// Outcome of a best-effort send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Connection gone or transport refused the write. Not an error:
    /// reconciliation covers the gap.
    Dropped,
}

/// Registry of live connections
pub struct ConnectionRegistry {
    clients: DashMap<String, ClientConnection>,
    subscriptions: Arc<SubscriptionIndex>,
    dropped: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(subscriptions: Arc<SubscriptionIndex>) -> Self {
        Self {
            clients: DashMap::new(),
            subscriptions,
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new connection, returning its generated id
    pub fn register(&self, transport: Arc<dyn Transport>) -> String {
        let conn_id = Uuid::new_v4().to_string();
        let connection = ClientConnection {
            id: conn_id.clone(),
            identity: None,
            connected_at: now_millis(),
            subscriptions: HashSet::new(),
            price_watch: HashMap::new(),
            transport,
        };
        self.clients.insert(conn_id.clone(), connection);
        tracing::debug!(conn_id = %conn_id, "Client registered");
        conn_id
    }

    /// Attach an identity to a connection
    pub fn authenticate(&self, conn_id: &str, user_id: &str, is_admin: bool) -> bool {
        match self.clients.get_mut(conn_id) {
            Some(mut conn) => {
                conn.identity = Some(Identity {
                    user_id: user_id.to_string(),
                    is_admin,
                });
                tracing::info!(conn_id = %conn_id, user_id = %user_id, is_admin, "Client authenticated");
                true
            }
            None => false,
        }
    }

    pub fn is_authenticated(&self, conn_id: &str) -> bool {
        self.clients
            .get(conn_id)
            .map(|c| c.identity.is_some())
            .unwrap_or(false)
    }

    pub fn is_admin(&self, conn_id: &str) -> bool {
        self.clients
            .get(conn_id)
            .and_then(|c| c.identity.as_ref().map(|i| i.is_admin))
            .unwrap_or(false)
    }

    /// User id of an authenticated connection
    pub fn user_id(&self, conn_id: &str) -> Option<String> {
        self.clients
            .get(conn_id)
            .and_then(|c| c.identity.as_ref().map(|i| i.user_id.clone()))
    }

    /// Record a subscription on the connection and in the index
    pub fn subscribe(&self, conn_id: &str, product_id: &str) -> bool {
        match self.clients.get_mut(conn_id) {
            Some(mut conn) => {
                conn.subscriptions.insert(product_id.to_string());
                // Index insert stays under the map guard: a concurrent
                // deregister blocks on the entry until the insert lands,
                // then its purge removes it. Both ops are synchronous.
                self.subscriptions.subscribe(product_id, conn_id);
                true
            }
            None => false,
        }
    }

    /// Drop a subscription. Unknown pairs are a no-op.
    pub fn unsubscribe(&self, conn_id: &str, product_id: &str) {
        if let Some(mut conn) = self.clients.get_mut(conn_id) {
            conn.subscriptions.remove(product_id);
        }
        self.subscriptions.unsubscribe(product_id, conn_id);
    }

    /// Set a price-drop target. A second call replaces the old target.
    pub fn watch_price(&self, conn_id: &str, product_id: &str, target: Decimal) -> bool {
        match self.clients.get_mut(conn_id) {
            Some(mut conn) => {
                conn.price_watch.insert(product_id.to_string(), target);
                // Same guard discipline as subscribe()
                self.subscriptions.watch(product_id, conn_id);
                true
            }
            None => false,
        }
    }

    /// Price target a connection holds for a product
    pub fn price_target(&self, conn_id: &str, product_id: &str) -> Option<Decimal> {
        self.clients
            .get(conn_id)
            .and_then(|c| c.price_watch.get(product_id).copied())
    }

    /// Connection ids of all authenticated admins
    pub fn admin_ids(&self) -> Vec<String> {
        self.clients
            .iter()
            .filter(|entry| {
                entry
                    .identity
                    .as_ref()
                    .map(|i| i.is_admin)
                    .unwrap_or(false)
            })
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Best-effort delivery to one connection.
    ///
    /// Never returns an error: a failed write bumps the dropped counter and
    /// the caller moves on.
    pub async fn send(&self, conn_id: &str, msg: &BusMessage) -> SendOutcome {
        // Clone the transport out before awaiting; holding a map guard
        // across the write would block every other sender.
        let transport = match self.clients.get(conn_id) {
            Some(conn) => conn.transport.clone(),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return SendOutcome::Dropped;
            }
        };

        match transport.write_message(msg).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(conn_id = %conn_id, error = %e, "Dropped outbound frame");
                SendOutcome::Dropped
            }
        }
    }

    /// Remove a connection and all its index entries. Idempotent.
    pub fn deregister(&self, conn_id: &str) {
        if self.clients.remove(conn_id).is_some() {
            self.subscriptions.remove_connection(conn_id);
            tracing::debug!(conn_id = %conn_id, "Client deregistered");
        }
    }

    /// Drop dead transports and connections that never authenticated
    /// within the grace period. Returns how many were removed.
    pub fn sweep(&self, auth_grace_millis: i64) -> usize {
        let now = now_millis();
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| {
                let dead = !entry.transport.is_writable();
                let unauthenticated_too_long =
                    entry.identity.is_none() && now - entry.connected_at > auth_grace_millis;
                dead || unauthenticated_too_long
            })
            .map(|entry| entry.id.clone())
            .collect();

        for conn_id in &stale {
            self.deregister(conn_id);
        }
        stale.len()
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Snapshot of every live connection: id, identity, age in millis.
    pub fn connected_clients(&self) -> Vec<(String, Option<Identity>, i64)> {
        let now = now_millis();
        self.clients
            .iter()
            .map(|entry| (entry.id.clone(), entry.identity.clone(), now - entry.connected_at))
            .collect()
    }

    /// Total outbound frames dropped since startup
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::transport::MemoryTransport;
    use shared::message::{StockUpdatePayload, SubscribePayload};

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(SubscriptionIndex::new()))
    }

    #[tokio::test]
    async fn test_register_authenticate_send() {
        let registry = registry();
        let (transport, mut rx) = MemoryTransport::channel();
        let conn_id = registry.register(Arc::new(transport));

        assert!(!registry.is_authenticated(&conn_id));
        assert!(registry.authenticate(&conn_id, "user:bob", false));
        assert!(registry.is_authenticated(&conn_id));
        assert!(!registry.is_admin(&conn_id));

        let msg = BusMessage::stock_update(&StockUpdatePayload {
            product_id: "product:tea".into(),
            stock: 3,
            previous_stock: 4,
            available: true,
        });
        assert_eq!(registry.send(&conn_id, &msg).await, SendOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap().event_type, msg.event_type);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_is_dropped() {
        let registry = registry();
        let msg = BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        });
        assert_eq!(registry.send("ghost", &msg).await, SendOutcome::Dropped);
        assert_eq!(registry.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_send_to_dead_transport_is_dropped_not_error() {
        let registry = registry();
        let (transport, _rx) = MemoryTransport::channel();
        let transport = Arc::new(transport);
        let conn_id = registry.register(transport.clone());
        transport.disconnect();

        let msg = BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        });
        assert_eq!(registry.send(&conn_id, &msg).await, SendOutcome::Dropped);
        assert_eq!(registry.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_deregister_cleans_subscription_index() {
        let index = Arc::new(SubscriptionIndex::new());
        let registry = ConnectionRegistry::new(index.clone());
        let (transport, _rx) = MemoryTransport::channel();
        let conn_id = registry.register(Arc::new(transport));

        registry.authenticate(&conn_id, "user:bob", false);
        registry.subscribe(&conn_id, "product:tea");
        registry.watch_price(&conn_id, "product:mug", Decimal::new(500, 2));
        assert_eq!(index.subscribers_of("product:tea"), vec![conn_id.clone()]);

        registry.deregister(&conn_id);
        assert!(index.subscribers_of("product:tea").is_empty());
        assert!(index.watchers_of("product:mug").is_empty());
        assert_eq!(registry.connection_count(), 0);

        // Second deregister is a no-op
        registry.deregister(&conn_id);
    }

    #[tokio::test]
    async fn test_watch_price_replaces_target() {
        let registry = registry();
        let (transport, _rx) = MemoryTransport::channel();
        let conn_id = registry.register(Arc::new(transport));

        registry.watch_price(&conn_id, "product:tea", Decimal::new(1000, 2));
        registry.watch_price(&conn_id, "product:tea", Decimal::new(800, 2));
        assert_eq!(
            registry.price_target(&conn_id, "product:tea"),
            Some(Decimal::new(800, 2))
        );
    }

    #[tokio::test]
    async fn test_sweep_removes_dead_and_unauthenticated() {
        let registry = registry();

        let (dead, _rx1) = MemoryTransport::channel();
        let dead = Arc::new(dead);
        let dead_id = registry.register(dead.clone());
        registry.authenticate(&dead_id, "user:bob", false);
        dead.disconnect();

        let (fresh, _rx2) = MemoryTransport::channel();
        let fresh_id = registry.register(Arc::new(fresh));
        registry.authenticate(&fresh_id, "user:eve", false);

        let (pending, _rx3) = MemoryTransport::channel();
        let _pending_id = registry.register(Arc::new(pending));

        // Grace of -1ms: any unauthenticated connection is already stale
        let removed = registry.sweep(-1);
        assert_eq!(removed, 2);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.is_authenticated(&fresh_id));
    }

    #[test]
    fn test_subscribe_racing_deregister_leaves_no_index_entry() {
        // subscribe and deregister come from different tasks (handler vs
        // connection reader / sweeper). Whatever order they land in, a
        // removed connection must not survive in the index.
        for _ in 0..200 {
            let index = Arc::new(SubscriptionIndex::new());
            let registry = Arc::new(ConnectionRegistry::new(index.clone()));
            let (transport, _rx) = MemoryTransport::channel();
            let conn_id = registry.register(Arc::new(transport));

            let subscriber = {
                let registry = registry.clone();
                let conn_id = conn_id.clone();
                std::thread::spawn(move || {
                    registry.subscribe(&conn_id, "product:tea");
                    registry.watch_price(&conn_id, "product:tea", Decimal::new(500, 2));
                })
            };
            let dropper = {
                let registry = registry.clone();
                let conn_id = conn_id.clone();
                std::thread::spawn(move || {
                    registry.deregister(&conn_id);
                })
            };
            subscriber.join().unwrap();
            dropper.join().unwrap();

            assert_eq!(registry.connection_count(), 0);
            assert!(index.subscribers_of("product:tea").is_empty());
            assert!(index.watchers_of("product:tea").is_empty());
        }
    }

    #[tokio::test]
    async fn test_admin_ids() {
        let registry = registry();
        let (t1, _r1) = MemoryTransport::channel();
        let (t2, _r2) = MemoryTransport::channel();
        let admin = registry.register(Arc::new(t1));
        let user = registry.register(Arc::new(t2));
        registry.authenticate(&admin, "admin:root", true);
        registry.authenticate(&user, "user:bob", false);

        assert_eq!(registry.admin_ids(), vec![admin]);
    }
}
