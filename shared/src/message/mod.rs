//! Message bus wire types
//!
//! These types are shared between the market server and clients, for both
//! in-process (memory) and network (TCP) communication.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

pub mod payload;
pub use payload::*;

/// Protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Message bus event types
///
/// The numeric value is the first byte of every wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // ===== Client -> Server =====
    /// Authenticate the connection
    Auth = 0,
    /// Subscribe to a product's stock/price changes
    Subscribe = 1,
    /// Drop a product subscription
    Unsubscribe = 2,
    /// Register a price-drop target for a product
    WatchPrice = 3,
    /// Admin: replace a product's stock level
    UpdateStock = 4,
    /// Admin: replace a product's price
    UpdatePrice = 5,

    // ===== Server -> Client =====
    /// Authentication outcome
    AuthResult = 6,
    /// Subscription acknowledged
    SubscriptionConfirmed = 7,
    /// A product's stock changed
    StockUpdate = 8,
    /// A product's price changed
    PriceUpdate = 9,
    /// A watched price target was crossed downward
    PriceDropAlert = 10,
    /// Admin feed: stock at or below threshold
    LowStockAlert = 11,
    /// Admin feed: stock reached zero
    OutOfStockAlert = 12,
    /// Admin feed: raw mutation, sent regardless of subscriptions
    AdminFeed = 13,
    /// Error frame (connection stays open)
    Error = 14,
}

impl TryFrom<u8> for EventType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(EventType::Auth),
            1 => Ok(EventType::Subscribe),
            2 => Ok(EventType::Unsubscribe),
            3 => Ok(EventType::WatchPrice),
            4 => Ok(EventType::UpdateStock),
            5 => Ok(EventType::UpdatePrice),
            6 => Ok(EventType::AuthResult),
            7 => Ok(EventType::SubscriptionConfirmed),
            8 => Ok(EventType::StockUpdate),
            9 => Ok(EventType::PriceUpdate),
            10 => Ok(EventType::PriceDropAlert),
            11 => Ok(EventType::LowStockAlert),
            12 => Ok(EventType::OutOfStockAlert),
            13 => Ok(EventType::AdminFeed),
            14 => Ok(EventType::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Auth => write!(f, "auth"),
            EventType::Subscribe => write!(f, "subscribe"),
            EventType::Unsubscribe => write!(f, "unsubscribe"),
            EventType::WatchPrice => write!(f, "watch_price"),
            EventType::UpdateStock => write!(f, "update_stock"),
            EventType::UpdatePrice => write!(f, "update_price"),
            EventType::AuthResult => write!(f, "auth_result"),
            EventType::SubscriptionConfirmed => write!(f, "subscription_confirmed"),
            EventType::StockUpdate => write!(f, "stock_update"),
            EventType::PriceUpdate => write!(f, "price_update"),
            EventType::PriceDropAlert => write!(f, "price_drop_alert"),
            EventType::LowStockAlert => write!(f, "low_stock_alert"),
            EventType::OutOfStockAlert => write!(f, "out_of_stock_alert"),
            EventType::AdminFeed => write!(f, "admin_feed"),
            EventType::Error => write!(f, "error"),
        }
    }
}

impl EventType {
    /// Whether this event travels from client to server
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            EventType::Auth
                | EventType::Subscribe
                | EventType::Unsubscribe
                | EventType::WatchPrice
                | EventType::UpdateStock
                | EventType::UpdatePrice
        )
    }
}

/// Message bus message body
///
/// `source` is the connection id of the sending client, stamped by the
/// server when a frame arrives so clients cannot spoof it. `target` is set
/// for unicast server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub request_id: Uuid,
    pub event_type: EventType,
    pub source: Option<String>,
    pub target: Option<String>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(event_type: EventType, payload: Vec<u8>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            event_type,
            source: None,
            target: None,
            payload,
        }
    }

    /// Stamp the originating connection id
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Set the target connection id (unicast)
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    fn from_payload<T: Serialize>(event_type: EventType, payload: &T) -> Self {
        let bytes = serde_json::to_vec(payload).expect("Failed to serialize payload");
        Self::new(event_type, bytes)
    }

    // ===== Client -> Server constructors =====

    pub fn auth(payload: &AuthPayload) -> Self {
        Self::from_payload(EventType::Auth, payload)
    }

    pub fn subscribe(payload: &SubscribePayload) -> Self {
        Self::from_payload(EventType::Subscribe, payload)
    }

    pub fn unsubscribe(payload: &SubscribePayload) -> Self {
        Self::from_payload(EventType::Unsubscribe, payload)
    }

    pub fn watch_price(payload: &WatchPricePayload) -> Self {
        Self::from_payload(EventType::WatchPrice, payload)
    }

    pub fn update_stock(payload: &UpdateStockPayload) -> Self {
        Self::from_payload(EventType::UpdateStock, payload)
    }

    pub fn update_price(payload: &UpdatePricePayload) -> Self {
        Self::from_payload(EventType::UpdatePrice, payload)
    }

    // ===== Server -> Client constructors =====

    pub fn auth_result(payload: &AuthResultPayload) -> Self {
        Self::from_payload(EventType::AuthResult, payload)
    }

    pub fn subscription_confirmed(payload: &SubscriptionConfirmedPayload) -> Self {
        Self::from_payload(EventType::SubscriptionConfirmed, payload)
    }

    pub fn stock_update(payload: &StockUpdatePayload) -> Self {
        Self::from_payload(EventType::StockUpdate, payload)
    }

    pub fn price_update(payload: &PriceUpdatePayload) -> Self {
        Self::from_payload(EventType::PriceUpdate, payload)
    }

    pub fn price_drop_alert(payload: &PriceDropAlertPayload) -> Self {
        Self::from_payload(EventType::PriceDropAlert, payload)
    }

    pub fn low_stock_alert(payload: &StockAlertPayload) -> Self {
        Self::from_payload(EventType::LowStockAlert, payload)
    }

    pub fn out_of_stock_alert(payload: &StockAlertPayload) -> Self {
        Self::from_payload(EventType::OutOfStockAlert, payload)
    }

    pub fn admin_feed(payload: &AdminFeedPayload) -> Self {
        Self::from_payload(EventType::AdminFeed, payload)
    }

    pub fn error(payload: &ErrorPayload) -> Self {
        Self::from_payload(EventType::Error, payload)
    }

    /// Parse the payload as a typed structure
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
