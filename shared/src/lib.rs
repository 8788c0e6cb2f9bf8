//! Shared types for the market server
//!
//! Common types used across the server and clients: the message bus wire
//! protocol, domain models (products, orders), error types and utility
//! helpers.

pub mod error;
pub mod message;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Message bus re-exports (for convenient access)
pub use message::{BusMessage, EventType};

// Error re-exports
pub use error::{AppError, AppResult, ErrorCode};
