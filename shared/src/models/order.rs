//! Order Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Stock reserved and order persisted, awaiting payment/fulfillment
    Pending,
    /// Fulfilled (set by the fulfillment layer, not this core)
    Completed,
    /// Cancelled; reserved stock has been released
    Cancelled,
}

/// One committed order line
///
/// `unit_price` is the price captured at validation time. A price change
/// racing with checkout never retroactively alters an in-flight order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl OrderLine {
    /// Line subtotal
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub lines: Vec<OrderLine>,
    pub total: Decimal,
    pub status: OrderStatus,
    /// Unix millis
    pub created_at: i64,
}

impl Order {
    /// Sum of line subtotals
    pub fn compute_total(lines: &[OrderLine]) -> Decimal {
        lines.iter().map(OrderLine::subtotal).sum()
    }
}

/// One line of a shopping cart (cleared when the order commits)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub product_id: String,
    pub quantity: i64,
}
