//! Message Handler for server-side message processing
//!
//! Consumes the inbound frame channel and runs the business logic behind
//! each client event: authentication, subscriptions, price watches and
//! admin ledger mutations.
//!
//! A failed operation answers the client with an Error frame and leaves
//! the connection open. Only a dead transport ends a connection.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use shared::message::{
    AuthPayload, AuthResultPayload, BusMessage, ErrorPayload, SubscribePayload,
    SubscriptionConfirmedPayload, UpdatePricePayload, UpdateStockPayload, WatchPricePayload,
};
use shared::{AppError, AppResult, EventType};

use super::dispatcher::{BroadcastDispatcher, MutationEvent};
use super::registry::ConnectionRegistry;
use crate::db::repository::{ProductRepository, RepoError};

/// Server-side message handler
///
/// Long-running task consuming every inbound frame. Frames without a
/// source stamp never reach business logic.
pub struct MessageHandler {
    receiver: broadcast::Receiver<BusMessage>,
    registry: Arc<ConnectionRegistry>,
    products: ProductRepository,
    dispatcher: Arc<BroadcastDispatcher>,
    shutdown_token: CancellationToken,
}

impl MessageHandler {
    pub fn new(
        receiver: broadcast::Receiver<BusMessage>,
        registry: Arc<ConnectionRegistry>,
        products: ProductRepository,
        dispatcher: Arc<BroadcastDispatcher>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            registry,
            products,
            dispatcher,
            shutdown_token,
        }
    }

    /// Start processing messages
    ///
    /// This is a long-running task that should be spawned in the background.
    pub async fn run(mut self) {
        tracing::info!("Message handler started");

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Message handler shutting down");
                    break;
                }

                msg_result = self.receiver.recv() => {
                    match msg_result {
                        Ok(msg) => self.handle_message(msg).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Message handler lagged, skipped {} messages", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Inbound channel closed");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Message handler stopped");
    }

    /// Route one inbound frame. Errors become Error frames to the sender.
    pub async fn handle_message(&self, msg: BusMessage) {
        let Some(conn_id) = msg.source.clone() else {
            tracing::warn!(event = %msg.event_type, "Dropping frame without source stamp");
            return;
        };

        if !msg.event_type.is_inbound() {
            tracing::warn!(conn_id = %conn_id, event = %msg.event_type, "Client sent server-only event");
            self.reply_error(&conn_id, AppError::invalid("Not a client event")).await;
            return;
        }

        let result = match msg.event_type {
            EventType::Auth => self.handle_auth(&conn_id, &msg).await,
            EventType::Subscribe => self.handle_subscribe(&conn_id, &msg).await,
            EventType::Unsubscribe => self.handle_unsubscribe(&conn_id, &msg).await,
            EventType::WatchPrice => self.handle_watch_price(&conn_id, &msg).await,
            EventType::UpdateStock => self.handle_update_stock(&conn_id, &msg).await,
            EventType::UpdatePrice => self.handle_update_price(&conn_id, &msg).await,
            _ => Err(AppError::invalid("Not a client event")),
        };

        if let Err(e) = result {
            tracing::debug!(conn_id = %conn_id, event = %msg.event_type, error = %e, "Request failed");
            self.reply_error(&conn_id, e).await;
        }
    }

    async fn handle_auth(&self, conn_id: &str, msg: &BusMessage) -> AppResult<()> {
        let payload: AuthPayload = msg
            .parse_payload()
            .map_err(|e| AppError::invalid(format!("Invalid auth payload: {}", e)))?;

        if payload.user_id.trim().is_empty() {
            let reply = BusMessage::auth_result(&AuthResultPayload::rejected("Empty user id"))
                .with_target(conn_id);
            self.registry.send(conn_id, &reply).await;
            return Ok(());
        }

        self.registry
            .authenticate(conn_id, &payload.user_id, payload.is_admin);
        let reply = BusMessage::auth_result(&AuthResultPayload::ok(&payload.user_id))
            .with_target(conn_id);
        self.registry.send(conn_id, &reply).await;
        Ok(())
    }

    async fn handle_subscribe(&self, conn_id: &str, msg: &BusMessage) -> AppResult<()> {
        self.require_auth(conn_id)?;
        let payload: SubscribePayload = msg
            .parse_payload()
            .map_err(|e| AppError::invalid(format!("Invalid subscribe payload: {}", e)))?;

        // Unknown products are subscribable; the client may be waiting for
        // a listing to appear. Existence is only enforced for admin writes.
        self.registry.subscribe(conn_id, &payload.product_id);
        let reply = BusMessage::subscription_confirmed(&SubscriptionConfirmedPayload {
            product_id: payload.product_id,
        })
        .with_target(conn_id);
        self.registry.send(conn_id, &reply).await;
        Ok(())
    }

    async fn handle_unsubscribe(&self, conn_id: &str, msg: &BusMessage) -> AppResult<()> {
        self.require_auth(conn_id)?;
        let payload: SubscribePayload = msg
            .parse_payload()
            .map_err(|e| AppError::invalid(format!("Invalid unsubscribe payload: {}", e)))?;
        self.registry.unsubscribe(conn_id, &payload.product_id);
        Ok(())
    }

    async fn handle_watch_price(&self, conn_id: &str, msg: &BusMessage) -> AppResult<()> {
        self.require_auth(conn_id)?;
        let payload: WatchPricePayload = msg
            .parse_payload()
            .map_err(|e| AppError::invalid(format!("Invalid watch payload: {}", e)))?;

        if payload.target_price < Decimal::ZERO {
            return Err(AppError::validation("Target price cannot be negative"));
        }

        self.registry
            .watch_price(conn_id, &payload.product_id, payload.target_price);
        Ok(())
    }

    async fn handle_update_stock(&self, conn_id: &str, msg: &BusMessage) -> AppResult<()> {
        self.require_admin(conn_id)?;
        let payload: UpdateStockPayload = msg
            .parse_payload()
            .map_err(|e| AppError::invalid(format!("Invalid stock payload: {}", e)))?;

        let actor = self
            .registry
            .user_id(conn_id)
            .unwrap_or_else(|| conn_id.to_string());
        let (previous, new) = self
            .products
            .set_stock(&payload.product_id, payload.new_stock, &payload.reason, &actor)
            .await
            .map_err(map_repo_error)?;

        self.dispatcher
            .on_mutation(&MutationEvent::stock_change(&payload.product_id, previous, new))
            .await;
        Ok(())
    }

    async fn handle_update_price(&self, conn_id: &str, msg: &BusMessage) -> AppResult<()> {
        self.require_admin(conn_id)?;
        let payload: UpdatePricePayload = msg
            .parse_payload()
            .map_err(|e| AppError::invalid(format!("Invalid price payload: {}", e)))?;

        let actor = self
            .registry
            .user_id(conn_id)
            .unwrap_or_else(|| conn_id.to_string());
        let (previous, new) = self
            .products
            .reprice(&payload.product_id, payload.new_price, &payload.reason, &actor)
            .await
            .map_err(map_repo_error)?;

        self.dispatcher
            .on_mutation(&MutationEvent::price_change(&payload.product_id, previous, new))
            .await;
        Ok(())
    }

    fn require_auth(&self, conn_id: &str) -> AppResult<()> {
        if !self.registry.is_authenticated(conn_id) {
            return Err(AppError::not_authenticated());
        }
        Ok(())
    }

    fn require_admin(&self, conn_id: &str) -> AppResult<()> {
        self.require_auth(conn_id)?;
        if !self.registry.is_admin(conn_id) {
            return Err(AppError::admin_required());
        }
        Ok(())
    }

    async fn reply_error(&self, conn_id: &str, error: AppError) {
        let reply = BusMessage::error(&ErrorPayload::from_error(&error)).with_target(conn_id);
        self.registry.send(conn_id, &reply).await;
    }
}

/// Map a storage error onto the wire error taxonomy
pub fn map_repo_error(err: RepoError) -> AppError {
    match err {
        RepoError::NotFound(what) => AppError::not_found(what),
        RepoError::Conflict(_) => AppError::stock_conflict(),
        RepoError::Validation(msg) => AppError::validation(msg),
        RepoError::Duplicate(what) => {
            AppError::with_message(shared::ErrorCode::AlreadyExists, what)
        }
        RepoError::Database(msg) => AppError::database(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use crate::message::subscription::SubscriptionIndex;
    use crate::message::transport::MemoryTransport;
    use shared::ErrorCode;
    use shared::models::ProductCreate;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        products: ProductRepository,
        handler: MessageHandler,
    }

    async fn fixture() -> Fixture {
        let service = DbService::memory().await.unwrap();
        let products = ProductRepository::new(service.db);
        let index = Arc::new(SubscriptionIndex::new());
        let registry = Arc::new(ConnectionRegistry::new(index.clone()));
        let dispatcher = Arc::new(BroadcastDispatcher::new(registry.clone(), index, 5));
        let (_tx, rx) = broadcast::channel(16);
        let handler = MessageHandler::new(
            rx,
            registry.clone(),
            products.clone(),
            dispatcher,
            CancellationToken::new(),
        );
        Fixture {
            registry,
            products,
            handler,
        }
    }

    fn connect(f: &Fixture) -> (String, UnboundedReceiver<BusMessage>) {
        let (transport, rx) = MemoryTransport::channel();
        let conn_id = f.registry.register(Arc::new(transport));
        (conn_id, rx)
    }

    async fn recv(rx: &mut UnboundedReceiver<BusMessage>) -> BusMessage {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_auth_flow() {
        let f = fixture().await;
        let (conn_id, mut rx) = connect(&f);

        let msg = BusMessage::auth(&AuthPayload {
            user_id: "user:bob".into(),
            is_admin: false,
        })
        .with_source(&conn_id);
        f.handler.handle_message(msg).await;

        let reply = recv(&mut rx).await;
        assert_eq!(reply.event_type, EventType::AuthResult);
        let payload: AuthResultPayload = reply.parse_payload().unwrap();
        assert!(payload.success);
        assert!(f.registry.is_authenticated(&conn_id));
    }

    #[tokio::test]
    async fn test_subscribe_requires_auth() {
        let f = fixture().await;
        let (conn_id, mut rx) = connect(&f);

        let msg = BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        })
        .with_source(&conn_id);
        f.handler.handle_message(msg).await;

        let reply = recv(&mut rx).await;
        assert_eq!(reply.event_type, EventType::Error);
        let payload: ErrorPayload = reply.parse_payload().unwrap();
        assert_eq!(payload.code, ErrorCode::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_subscribe_confirmed_after_auth() {
        let f = fixture().await;
        let (conn_id, mut rx) = connect(&f);
        f.registry.authenticate(&conn_id, "user:bob", false);

        let msg = BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        })
        .with_source(&conn_id);
        f.handler.handle_message(msg).await;

        let reply = recv(&mut rx).await;
        assert_eq!(reply.event_type, EventType::SubscriptionConfirmed);
    }

    #[tokio::test]
    async fn test_update_stock_requires_admin() {
        let f = fixture().await;
        let (conn_id, mut rx) = connect(&f);
        f.registry.authenticate(&conn_id, "user:bob", false);

        let msg = BusMessage::update_stock(&UpdateStockPayload {
            product_id: "product:tea".into(),
            new_stock: 50,
            reason: "restock".into(),
        })
        .with_source(&conn_id);
        f.handler.handle_message(msg).await;

        let reply = recv(&mut rx).await;
        assert_eq!(reply.event_type, EventType::Error);
        let payload: ErrorPayload = reply.parse_payload().unwrap();
        assert_eq!(payload.code, ErrorCode::AdminRequired);
    }

    #[tokio::test]
    async fn test_admin_update_stock_notifies_subscriber() {
        let f = fixture().await;
        let created = f
            .products
            .create(ProductCreate {
                name: "Tea".into(),
                seller: None,
                stock: 3,
                price: Decimal::new(500, 2),
                is_active: None,
            })
            .await
            .unwrap();
        let product_id = created.id.unwrap();

        let (admin, _admin_rx) = connect(&f);
        f.registry.authenticate(&admin, "admin:root", true);
        let (sub, mut sub_rx) = connect(&f);
        f.registry.authenticate(&sub, "user:bob", false);
        f.registry.subscribe(&sub, &product_id);

        let msg = BusMessage::update_stock(&UpdateStockPayload {
            product_id: product_id.clone(),
            new_stock: 50,
            reason: "restock".into(),
        })
        .with_source(&admin);
        f.handler.handle_message(msg).await;

        let reply = recv(&mut sub_rx).await;
        assert_eq!(reply.event_type, EventType::StockUpdate);
        let payload: shared::message::StockUpdatePayload = reply.parse_payload().unwrap();
        assert_eq!((payload.previous_stock, payload.stock), (3, 50));

        let stored = f.products.find_by_id(&product_id).await.unwrap().unwrap();
        assert_eq!(stored.stock, 50);
    }

    #[tokio::test]
    async fn test_update_missing_product_reports_not_found() {
        let f = fixture().await;
        let (admin, mut rx) = connect(&f);
        f.registry.authenticate(&admin, "admin:root", true);

        let msg = BusMessage::update_price(&UpdatePricePayload {
            product_id: "product:ghost".into(),
            new_price: Decimal::new(100, 2),
            reason: "sale".into(),
        })
        .with_source(&admin);
        f.handler.handle_message(msg).await;

        let reply = recv(&mut rx).await;
        assert_eq!(reply.event_type, EventType::Error);
        let payload: ErrorPayload = reply.parse_payload().unwrap();
        assert_eq!(payload.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_frame_without_source_is_dropped() {
        let f = fixture().await;
        let msg = BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        });
        // No source stamp, no panic, no reply
        f.handler.handle_message(msg).await;
    }
}
