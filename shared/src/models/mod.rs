//! Domain models shared between the server and clients

pub mod order;
pub mod product;

pub use order::{CartLine, Order, OrderLine, OrderStatus};
pub use product::{PriceChange, Product, ProductCreate, StockChange};
