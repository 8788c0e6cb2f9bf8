//! Server lifecycle
//!
//! Starts the background tasks and blocks until the process receives a
//! shutdown signal.

use shared::AppResult;

use crate::core::{Config, ServerState};

pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state (tests wire their own)
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config).await?,
        };

        let tasks = state.start_background_tasks();

        tracing::info!(
            port = self.config.message_tcp_port,
            environment = %self.config.environment,
            "Market server running"
        );

        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down...");

        tasks.shutdown().await;
        Ok(())
    }
}
