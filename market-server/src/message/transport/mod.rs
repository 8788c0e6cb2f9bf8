//! Transport abstraction
//!
//! Pluggable byte-level delivery for bus messages:
//! ```text
//!         ┌────────────────────┐
//!         │   Transport Trait  │
//!         └────────┬───────────┘
//!                  │
//!          ┌───────┴────────┐
//!          ▼                ▼
//!     TcpTransport    MemoryTransport
//!     (network)       (in-process, tests)
//! ```

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use shared::message::{BusMessage, EventType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::utils::AppError;

/// Transport trait
///
/// One instance per client connection. Writes must be safe to call from
/// multiple tasks; reads are driven by a single owner.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Read one message from the transport
    async fn read_message(&self) -> Result<BusMessage, AppError>;

    /// Write one message to the transport
    async fn write_message(&self, msg: &BusMessage) -> Result<(), AppError>;

    /// Close the transport
    async fn close(&self) -> Result<(), AppError>;

    /// Whether writes still have a chance of being delivered
    fn is_writable(&self) -> bool {
        true
    }

    /// Peer address, if the transport has one
    fn peer_addr(&self) -> Option<String> {
        None
    }
}

// ========== Frame codec ==========
//
// Wire frame layout (little endian):
//   [1]  event type
//   [16] request id
//   [4]  payload length
//   [..] payload (JSON)

/// Read one BusMessage from an async stream
pub(crate) async fn read_from_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<BusMessage, AppError> {
    // Event type (1 byte)
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(AppError::channel_closed("Client disconnected"));
        }
        Err(e) => {
            return Err(AppError::internal(format!("Read type failed: {}", e)));
        }
    }

    let event_type =
        EventType::try_from(type_buf[0]).map_err(|_| AppError::invalid("Invalid event type"))?;

    // Request ID (16 bytes)
    let mut uuid_buf = [0u8; 16];
    reader
        .read_exact(&mut uuid_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read UUID failed: {}", e)))?;
    let request_id = Uuid::from_bytes(uuid_buf);

    // Payload length (4 bytes)
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read len failed: {}", e)))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Payload
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::internal(format!("Read payload failed: {}", e)))?;

    Ok(BusMessage {
        request_id,
        event_type,
        source: None,
        target: None,
        payload,
    })
}

/// Write one BusMessage to an async stream
pub(crate) async fn write_to_stream<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &BusMessage,
) -> Result<(), AppError> {
    let mut data = Vec::with_capacity(21 + msg.payload.len());
    data.push(msg.event_type as u8);
    data.extend_from_slice(msg.request_id.as_bytes());
    data.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
    data.extend_from_slice(&msg.payload);

    writer
        .write_all(&data)
        .await
        .map_err(|e| AppError::internal(format!("Write failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::SubscribePayload;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let msg = BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        });

        let mut buf = Vec::new();
        write_to_stream(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_from_stream(&mut cursor).await.unwrap();
        assert_eq!(decoded.event_type, EventType::Subscribe);
        assert_eq!(decoded.request_id, msg.request_id);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_from_stream(&mut cursor).await.unwrap_err();
        assert_eq!(err.code, shared::ErrorCode::ChannelClosed);
    }

    #[tokio::test]
    async fn test_unknown_event_type_rejected() {
        let mut cursor = std::io::Cursor::new(vec![0xFFu8; 21]);
        let err = read_from_stream(&mut cursor).await.unwrap_err();
        assert_eq!(err.code, shared::ErrorCode::InvalidRequest);
    }
}
