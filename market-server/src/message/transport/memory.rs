//! In-process memory transport (tests, same-process clients)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shared::message::BusMessage;
use tokio::sync::{Mutex, mpsc};

use super::Transport;
use crate::utils::AppError;

/// Memory transport
///
/// Writes land in an unbounded channel the test holds the other end of,
/// so a test can assert exactly which frames "the client" received.
/// Reads drain an optional inbound queue fed with [`MemoryTransport::push`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<BusMessage>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<BusMessage>>>,
    inbound_tx: mpsc::UnboundedSender<BusMessage>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a transport plus the receiver that observes everything
    /// written to it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BusMessage>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = Self {
            outbound: out_tx,
            inbound: Arc::new(Mutex::new(in_rx)),
            inbound_tx: in_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (transport, out_rx)
    }

    /// Queue a frame for the next `read_message` call
    pub fn push(&self, msg: BusMessage) {
        let _ = self.inbound_tx.send(msg);
    }

    /// Simulate the peer going away
    pub fn disconnect(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_message(&self) -> Result<BusMessage, AppError> {
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .ok_or_else(|| AppError::channel_closed("Memory transport closed"))
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AppError::channel_closed("Memory transport closed"));
        }
        self.outbound
            .send(msg.clone())
            .map_err(|_| AppError::channel_closed("Memory transport receiver dropped"))
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && !self.outbound.is_closed()
    }
}
