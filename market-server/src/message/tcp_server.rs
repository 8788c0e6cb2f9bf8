//! TCP server
//!
//! Accepts client connections, registers them, and pumps their frames into
//! the inbound channel with the connection id stamped as `source`. Clients
//! never choose their own id, so a frame's origin is always trustworthy.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use shared::message::BusMessage;

use super::registry::ConnectionRegistry;
use super::transport::{TcpTransport, Transport};
use crate::utils::AppError;

/// Message bus TCP listener
pub struct MessageServer {
    listen_addr: String,
    registry: Arc<ConnectionRegistry>,
    inbound_tx: broadcast::Sender<BusMessage>,
    shutdown_token: CancellationToken,
}

impl MessageServer {
    pub fn new(
        listen_addr: String,
        registry: Arc<ConnectionRegistry>,
        inbound_tx: broadcast::Sender<BusMessage>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            listen_addr,
            registry,
            inbound_tx,
            shutdown_token,
        }
    }

    /// Bind and run the accept loop until shutdown
    pub async fn run(self) -> Result<(), AppError> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind: {}", e)))?;

        tracing::info!("Message server listening on {}", self.listen_addr);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Message server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Client connected: {}", addr);
                            self.spawn_client_handler(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_client_handler(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let inbound_tx = self.inbound_tx.clone();
        let shutdown_token = self.shutdown_token.clone();

        tokio::spawn(async move {
            handle_client_connection(stream, addr, registry, inbound_tx, shutdown_token).await;
        });
    }
}

/// Read loop for a single client connection
async fn handle_client_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    inbound_tx: broadcast::Sender<BusMessage>,
    shutdown_token: CancellationToken,
) {
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::from_stream(stream));
    let conn_id = registry.register(transport.clone());

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                break;
            }

            result = transport.read_message() => {
                match result {
                    Ok(msg) => {
                        let stamped = msg.with_source(&conn_id);
                        if inbound_tx.send(stamped).is_err() {
                            tracing::warn!("Inbound channel has no consumers, closing {}", addr);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(conn_id = %conn_id, "Client {} read ended: {}", addr, e);
                        break;
                    }
                }
            }
        }
    }

    let _ = transport.close().await;
    registry.deregister(&conn_id);
}
