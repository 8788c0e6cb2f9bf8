//! Market Server - real-time marketplace inventory core
//!
//! # Architecture
//!
//! This crate is the inventory consistency and notification core of the
//! marketplace backend. The surrounding CRUD layer (catalog management,
//! carts, sellers, admin dashboards) talks to it through the repositories
//! and the checkout coordinator; connected clients talk to it over the
//! message bus.
//!
//! # Module structure
//!
//! ```text
//! market-server/src/
//! ├── core/          # Config, server state, background task manager
//! ├── db/            # Embedded SurrealDB, product/order repositories
//! ├── message/       # Transport, connection registry, subscriptions, dispatch
//! ├── checkout/      # Order creation coordinator (reserve + persist + rollback)
//! ├── reconcile/     # Periodic re-broadcast and stale-connection sweep
//! └── utils/         # Logging, result aliases
//! ```

pub mod checkout;
pub mod core;
pub mod db;
pub mod message;
pub mod reconcile;
pub mod utils;

// Re-export public types
pub use crate::core::{Config, Server, ServerState};
pub use message::{BroadcastDispatcher, ConnectionRegistry, MutationEvent, SubscriptionIndex};
pub use shared::{AppError, AppResult, BusMessage, EventType};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
    __  ___           __        __
   /  |/  /___ ______/ /_____  / /_
  / /|_/ / __ `/ ___/ //_/ _ \/ __/
 / /  / / /_/ / /  / ,< /  __/ /_
/_/  /_/\__,_/_/  /_/|_|\___/\__/
   _____
  / ___/___  ______   _____  _____
  \__ \/ _ \/ ___/ | / / _ \/ ___/
 ___/ /  __/ /   | |/ /  __/ /
/____/\___/_/    |___/\___/_/
    "#
    );
}

/// Load .env and make sure the work directory exists
pub fn setup_environment() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    let work_dir = std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/market".into());
    std::fs::create_dir_all(&work_dir)?;
    Ok(())
}
