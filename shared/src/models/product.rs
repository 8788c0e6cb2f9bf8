//! Product Model
//!
//! The catalog record the inventory core mutates. Only `stock`, `price`,
//! `sales_count`, the two history vectors and `last_updated` are owned by
//! this core; everything else belongs to the surrounding catalog CRUD layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Seller reference (String ID)
    pub seller: Option<String>,
    /// Units on hand, never negative
    pub stock: i64,
    /// Current unit price
    pub price: Decimal,
    /// Running count of units sold (incremented by reservations)
    pub sales_count: i64,
    pub is_active: bool,
    /// Append-only stock mutation history
    #[serde(default)]
    pub stock_history: Vec<StockChange>,
    /// Append-only price mutation history
    #[serde(default)]
    pub price_history: Vec<PriceChange>,
    /// Unix millis of the last stock/price mutation
    pub last_updated: i64,
}

/// One stock mutation, appended to `stock_history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChange {
    pub previous: i64,
    pub new: i64,
    pub delta: i64,
    /// e.g. "order", "release", "admin_update", "cancellation"
    pub reason: String,
    /// User or system component that caused the change
    pub actor: String,
    /// Unix millis
    pub timestamp: i64,
}

/// One price mutation, appended to `price_history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChange {
    pub previous: Decimal,
    pub new: Decimal,
    pub delta: Decimal,
    pub reason: String,
    pub actor: String,
    /// Unix millis
    pub timestamp: i64,
}

/// Create product payload (seeding / catalog layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCreate {
    pub name: String,
    pub seller: Option<String>,
    pub stock: i64,
    pub price: Decimal,
    pub is_active: Option<bool>,
}

impl Product {
    /// Whether at least one unit can currently be reserved
    pub fn is_available(&self) -> bool {
        self.is_active && self.stock > 0
    }
}
