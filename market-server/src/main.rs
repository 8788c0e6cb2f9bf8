use market_server::{Config, Server, ServerState, init_logger, print_banner, setup_environment};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Environment (dotenv, work dir)
    setup_environment()?;
    init_logger();

    print_banner();
    tracing::info!("Market server starting...");

    // 2. Load configuration
    let config = Config::from_env();

    // 3. Initialize server state (db, registries, dispatcher, coordinator)
    let state = ServerState::initialize(&config).await?;

    // 4. Run (spawns background tasks, blocks until shutdown signal)
    let server = Server::with_state(config, state);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
