//! TCP transport implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use shared::message::BusMessage;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use super::{Transport, read_from_stream, write_to_stream};
use crate::utils::AppError;

/// TCP transport
///
/// Split stream halves behind separate locks, so the read loop never blocks
/// concurrent writers. `closed` latches on the first failed read or write;
/// the connection sweeper uses it to spot dead peers between frames.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
    addr: Option<String>,
}

impl TcpTransport {
    /// Connect to a remote server (client side)
    pub async fn connect(addr: &str) -> Result<Self, AppError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| AppError::internal(format!("TCP connect failed: {}", e)))?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an accepted TcpStream (server side)
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (reader, writer) = stream.into_split();
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
            addr: peer_addr,
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_message(&self) -> Result<BusMessage, AppError> {
        let mut reader = self.reader.lock().await;
        let result = read_from_stream(&mut *reader).await;
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AppError::channel_closed("Transport closed"));
        }
        let mut writer = self.writer.lock().await;
        let result = write_to_stream(&mut *writer, msg).await;
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    async fn close(&self) -> Result<(), AppError> {
        use tokio::io::AsyncWriteExt;
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("TCP close failed: {}", e)))?;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    fn peer_addr(&self) -> Option<String> {
        self.addr.clone()
    }
}
