//! Server state wiring
//!
//! Builds every service once at startup and hands out shared handles.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use tokio::sync::broadcast;

use shared::AppError;
use shared::message::BusMessage;

use crate::checkout::CheckoutCoordinator;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::Config;
use crate::db::DbService;
use crate::db::repository::{OrderRepository, ProductRepository};
use crate::message::dispatcher::BroadcastDispatcher;
use crate::message::handler::MessageHandler;
use crate::message::registry::ConnectionRegistry;
use crate::message::subscription::SubscriptionIndex;
use crate::message::tcp_server::MessageServer;
use crate::reconcile::{ConnectionSweeper, Reconciler};

#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub db: Surreal<Db>,
    pub products: ProductRepository,
    pub orders: OrderRepository,
    pub subscriptions: Arc<SubscriptionIndex>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub coordinator: Arc<CheckoutCoordinator>,
    /// Inbound frames from all transports; the handler consumes this
    pub inbound_tx: broadcast::Sender<BusMessage>,
}

impl ServerState {
    pub async fn initialize(config: &Config) -> Result<Self, AppError> {
        // 1. Database
        let db_path = PathBuf::from(&config.work_dir).join("market.db");
        let db_service = DbService::new(&db_path.to_string_lossy()).await?;
        let db = db_service.db;

        Ok(Self::with_db(config, db))
    }

    /// Wire services around an already-open database (tests use Mem)
    pub fn with_db(config: &Config, db: Surreal<Db>) -> Self {
        let products = ProductRepository::new(db.clone());
        let orders = OrderRepository::new(db.clone());

        let subscriptions = Arc::new(SubscriptionIndex::new());
        let registry = Arc::new(ConnectionRegistry::new(subscriptions.clone()));
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            registry.clone(),
            subscriptions.clone(),
            config.low_stock_threshold,
        ));
        let coordinator = Arc::new(CheckoutCoordinator::new(
            products.clone(),
            orders.clone(),
            dispatcher.clone(),
            Duration::from_millis(config.checkout_timeout_ms),
        ));

        let (inbound_tx, _) = broadcast::channel(config.channel_capacity);

        Self {
            config: config.clone(),
            db,
            products,
            orders,
            subscriptions,
            registry,
            dispatcher,
            coordinator,
            inbound_tx,
        }
    }

    /// Register all background tasks and return the running manager
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();
        let shutdown = tasks.shutdown_token();

        // Inbound frame consumer
        let handler = MessageHandler::new(
            self.inbound_tx.subscribe(),
            self.registry.clone(),
            self.products.clone(),
            self.dispatcher.clone(),
            shutdown.clone(),
        );
        tasks.spawn("message_handler", TaskKind::Listener, handler.run());

        // TCP accept loop
        let server = MessageServer::new(
            format!("0.0.0.0:{}", self.config.message_tcp_port),
            self.registry.clone(),
            self.inbound_tx.clone(),
            shutdown.clone(),
        );
        tasks.spawn("message_server", TaskKind::Worker, async move {
            if let Err(e) = server.run().await {
                tracing::error!("Message server failed: {}", e);
            }
        });

        // Ledger re-broadcast
        let reconciler = Reconciler::new(
            self.products.clone(),
            self.dispatcher.clone(),
            Duration::from_secs(self.config.reconcile_interval_secs),
            shutdown.clone(),
        );
        tasks.spawn("reconciler", TaskKind::Periodic, reconciler.run());

        // Stale connection eviction
        let sweeper = ConnectionSweeper::new(
            self.registry.clone(),
            Duration::from_secs(self.config.sweep_interval_secs),
            Duration::from_secs(self.config.auth_grace_secs),
            shutdown,
        );
        tasks.spawn("connection_sweeper", TaskKind::Periodic, sweeper.run());

        tasks.log_summary();
        tasks
    }
}
