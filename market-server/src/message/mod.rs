//! Message Module
//!
//! Real-time notification plumbing between the inventory core and connected
//! clients:
//!
//! ```text
//!   TCP clients ──► tcp_server ──► broadcast channel ──► MessageHandler
//!                                                            │
//!                       ┌────────────────────────────────────┤
//!                       ▼                                    ▼
//!               ConnectionRegistry ◄───────────── BroadcastDispatcher
//!               (per-connection writes)           (fan-out + alerts)
//!                       │
//!                       ▼
//!               SubscriptionIndex
//!               (product -> connection ids)
//! ```
//!
//! Inbound frames are stamped with the connection id before they enter the
//! channel, so handlers always know who is asking. All outbound delivery is
//! per-connection and best effort: a slow or dead client loses frames, the
//! ledger is never blocked.

pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod subscription;
pub mod tcp_server;
pub mod transport;

pub use dispatcher::{BroadcastDispatcher, MutationEvent};
pub use handler::MessageHandler;
pub use registry::{ClientConnection, ConnectionRegistry, Identity, SendOutcome};
pub use subscription::SubscriptionIndex;
pub use tcp_server::MessageServer;
pub use transport::{MemoryTransport, TcpTransport, Transport};

pub use shared::message::{BusMessage, EventType};
