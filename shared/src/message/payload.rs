use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

// ==================== Client -> Server ====================

/// Authentication payload
///
/// Identity is established once per connection; subscribe/watch/admin
/// operations are rejected until this frame has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Subscribe / unsubscribe payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub product_id: String,
}

/// Price-watch payload
///
/// Overwrites any prior target for the same (connection, product) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchPricePayload {
    pub product_id: String,
    pub target_price: Decimal,
}

/// Admin stock replacement payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStockPayload {
    pub product_id: String,
    pub new_stock: i64,
    pub reason: String,
}

/// Admin price replacement payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePricePayload {
    pub product_id: String,
    pub new_price: Decimal,
    pub reason: String,
}

// ==================== Server -> Client ====================

/// Authentication outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResultPayload {
    pub success: bool,
    pub message: String,
}

/// Subscription acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfirmedPayload {
    pub product_id: String,
}

/// Stock change notification (subscribers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUpdatePayload {
    pub product_id: String,
    pub stock: i64,
    pub previous_stock: i64,
    /// False once stock reaches zero
    pub available: bool,
}

/// Price change notification (subscribers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdatePayload {
    pub product_id: String,
    pub price: Decimal,
    pub previous_price: Decimal,
    /// Signed percentage change, rounded to 2 decimal places
    pub change_percent: Decimal,
}

/// One-time price-drop alert (sent only to the watcher whose target was crossed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDropAlertPayload {
    pub product_id: String,
    pub new_price: Decimal,
    pub target_price: Decimal,
}

/// Low-stock / out-of-stock alert (admin feed only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAlertPayload {
    pub product_id: String,
    pub stock: i64,
}

/// Raw mutation forwarded to the admin feed regardless of subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminFeedPayload {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<Decimal>,
    /// Unix millis
    pub timestamp: i64,
}

/// Error frame payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

// ==================== Convenience Constructors ====================

impl AuthResultPayload {
    pub fn ok(user_id: &str) -> Self {
        Self {
            success: true,
            message: format!("Authenticated as {}", user_id),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_error(err: &crate::error::AppError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
        }
    }
}
