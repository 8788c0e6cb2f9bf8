//! Core module - server configuration, state and lifecycle
//!
//! # Module structure
//!
//! - [`Config`] - server configuration
//! - [`ServerState`] - wired-up services and shared handles
//! - [`Server`] - process lifecycle (startup, shutdown signal)
//! - [`BackgroundTasks`] - background task registration and shutdown

pub mod config;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use server::Server;
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
