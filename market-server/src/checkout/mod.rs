//! Checkout Module
//!
//! Order creation against the stock ledger. Reservation is per-line CAS
//! with saga-style compensation instead of a multi-document transaction.

pub mod coordinator;

pub use coordinator::{CheckoutCoordinator, LineRequest, OrderRequest};
