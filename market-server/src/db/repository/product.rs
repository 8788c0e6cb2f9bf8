//! Product Repository
//!
//! Owns the stock ledger. All stock mutations go through this repository so
//! that every change lands in a single atomic statement with its history
//! entry attached.

use super::{BaseRepository, RepoError, RepoResult, strip_table_prefix};
use rust_decimal::Decimal;
use shared::models::{PriceChange, Product, ProductCreate, StockChange};
use shared::util::{now_millis, snowflake_id};
use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const PRODUCT_TABLE: &str = "product";

// =============================================================================
// Product Repository
// =============================================================================

#[derive(Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find all active products
    pub async fn find_all(&self) -> RepoResult<Vec<Product>> {
        let products: Vec<Product> = self
            .base
            .db()
            .query("SELECT *, <string>id AS id FROM product WHERE is_active = true ORDER BY name")
            .await?
            .take(0)?;
        Ok(products)
    }

    /// Find product by id
    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Product>> {
        let pure_id = strip_table_prefix(PRODUCT_TABLE, id);
        let record = RecordId::from_table_key(PRODUCT_TABLE, pure_id);
        let products: Vec<Product> = self
            .base
            .db()
            .query("SELECT *, <string>id AS id FROM product WHERE id = $id")
            .bind(("id", record))
            .await?
            .take(0)?;
        Ok(products.into_iter().next())
    }

    /// Create a new product
    pub async fn create(&self, data: ProductCreate) -> RepoResult<Product> {
        if data.price < Decimal::ZERO {
            return Err(RepoError::Validation("price cannot be negative".into()));
        }
        if data.stock < 0 {
            return Err(RepoError::Validation("stock cannot be negative".into()));
        }

        let key = snowflake_id().to_string();
        let product = Product {
            id: None,
            name: data.name,
            seller: data.seller,
            stock: data.stock,
            price: data.price,
            sales_count: 0,
            is_active: data.is_active.unwrap_or(true),
            stock_history: Vec::new(),
            price_history: Vec::new(),
            last_updated: now_millis(),
        };

        self.base
            .db()
            .query("CREATE type::thing('product', $key) CONTENT $data RETURN NONE")
            .bind(("key", key.clone()))
            .bind(("data", product))
            .await?;

        self.find_by_id(&key)
            .await?
            .ok_or_else(|| RepoError::Database("create returned no record".into()))
    }

    /// Reserve `quantity` units, decrementing stock only if enough remain.
    ///
    /// The guard and the decrement run in one statement, so two concurrent
    /// reservations can never both succeed on the last unit. Returns the
    /// stock level after the decrement.
    pub async fn reserve(&self, id: &str, quantity: i64, actor: &str) -> RepoResult<i64> {
        if quantity < 1 {
            return Err(RepoError::Validation("quantity must be at least 1".into()));
        }

        let pure_id = strip_table_prefix(PRODUCT_TABLE, id).to_string();
        let record = RecordId::from_table_key(PRODUCT_TABLE, &pure_id);
        let now = now_millis();

        let mut result = self
            .base
            .db()
            .query(
                "UPDATE $id SET \
                   stock -= $qty, \
                   sales_count += $qty, \
                   last_updated = $now, \
                   stock_history += { \
                     previous: stock + $qty, \
                     new: stock, \
                     delta: -$qty, \
                     reason: 'order', \
                     actor: $actor, \
                     timestamp: $now \
                   } \
                 WHERE stock >= $qty AND is_active = true \
                 RETURN VALUE stock",
            )
            .bind(("id", record))
            .bind(("qty", quantity))
            .bind(("now", now))
            .bind(("actor", actor.to_string()))
            .await?;

        let updated: Vec<i64> = result.take(0)?;
        match updated.into_iter().next() {
            Some(stock) => Ok(stock),
            None => {
                // Guard failed: distinguish a missing product from a conflict
                match self.find_by_id(&pure_id).await? {
                    Some(p) if !p.is_active => {
                        Err(RepoError::Conflict(format!("product inactive: {pure_id}")))
                    }
                    Some(p) => Err(RepoError::Conflict(format!(
                        "insufficient stock for {pure_id}: have {}, want {quantity}",
                        p.stock
                    ))),
                    None => Err(RepoError::NotFound(format!("product: {pure_id}"))),
                }
            }
        }
    }

    /// Release previously reserved units back into stock.
    ///
    /// Unconditional increment. Used for compensation after a failed checkout
    /// and for order cancellation. Returns the stock level after the release.
    pub async fn release(
        &self,
        id: &str,
        quantity: i64,
        reason: &str,
        actor: &str,
    ) -> RepoResult<i64> {
        if quantity < 1 {
            return Err(RepoError::Validation("quantity must be at least 1".into()));
        }

        let pure_id = strip_table_prefix(PRODUCT_TABLE, id).to_string();
        let record = RecordId::from_table_key(PRODUCT_TABLE, &pure_id);
        let now = now_millis();

        let mut result = self
            .base
            .db()
            .query(
                "UPDATE $id SET \
                   stock += $qty, \
                   sales_count -= $qty, \
                   last_updated = $now, \
                   stock_history += { \
                     previous: stock - $qty, \
                     new: stock, \
                     delta: $qty, \
                     reason: $reason, \
                     actor: $actor, \
                     timestamp: $now \
                   } \
                 RETURN VALUE stock",
            )
            .bind(("id", record))
            .bind(("qty", quantity))
            .bind(("now", now))
            .bind(("reason", reason.to_string()))
            .bind(("actor", actor.to_string()))
            .await?;

        let updated: Vec<i64> = result.take(0)?;
        updated
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::NotFound(format!("product: {pure_id}")))
    }

    /// Set stock to an absolute level (admin restock / correction).
    ///
    /// Returns (previous, new) stock levels.
    pub async fn set_stock(
        &self,
        id: &str,
        new_stock: i64,
        reason: &str,
        actor: &str,
    ) -> RepoResult<(i64, i64)> {
        if new_stock < 0 {
            return Err(RepoError::Validation("stock cannot be negative".into()));
        }

        let pure_id = strip_table_prefix(PRODUCT_TABLE, id).to_string();
        let previous = self
            .find_by_id(&pure_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("product: {pure_id}")))?
            .stock;

        let record = RecordId::from_table_key(PRODUCT_TABLE, &pure_id);
        let now = now_millis();

        self.base
            .db()
            .query(
                "UPDATE $id SET \
                   stock_history += { \
                     previous: stock, \
                     new: $new_stock, \
                     delta: $new_stock - stock, \
                     reason: $reason, \
                     actor: $actor, \
                     timestamp: $now \
                   }, \
                   stock = $new_stock, \
                   last_updated = $now \
                 RETURN NONE",
            )
            .bind(("id", record))
            .bind(("new_stock", new_stock))
            .bind(("now", now))
            .bind(("reason", reason.to_string()))
            .bind(("actor", actor.to_string()))
            .await?;

        Ok((previous, new_stock))
    }

    /// Change the price, recording the change in the price history.
    ///
    /// Returns (previous, new) prices.
    pub async fn reprice(
        &self,
        id: &str,
        new_price: Decimal,
        reason: &str,
        actor: &str,
    ) -> RepoResult<(Decimal, Decimal)> {
        if new_price < Decimal::ZERO {
            return Err(RepoError::Validation("price cannot be negative".into()));
        }

        let pure_id = strip_table_prefix(PRODUCT_TABLE, id).to_string();
        let previous = self
            .find_by_id(&pure_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("product: {pure_id}")))?
            .price;

        let record = RecordId::from_table_key(PRODUCT_TABLE, &pure_id);
        let now = now_millis();

        self.base
            .db()
            .query(
                "UPDATE $id SET \
                   price_history += { \
                     previous: price, \
                     new: $new_price, \
                     delta: $new_price - price, \
                     reason: $reason, \
                     actor: $actor, \
                     timestamp: $now \
                   }, \
                   price = $new_price, \
                   last_updated = $now \
                 RETURN NONE",
            )
            .bind(("id", record))
            .bind(("new_price", new_price))
            .bind(("now", now))
            .bind(("reason", reason.to_string()))
            .bind(("actor", actor.to_string()))
            .await?;

        Ok((previous, new_price))
    }

    /// Products whose ledger changed at or after `since` (millis).
    ///
    /// Drives the reconciliation re-broadcast.
    pub async fn find_updated_since(&self, since: i64) -> RepoResult<Vec<Product>> {
        let products: Vec<Product> = self
            .base
            .db()
            .query("SELECT *, <string>id AS id FROM product WHERE last_updated >= $since")
            .bind(("since", since))
            .await?
            .take(0)?;
        Ok(products)
    }

    /// Most recent stock history entry, if any
    pub fn last_stock_change(product: &Product) -> Option<&StockChange> {
        product.stock_history.last()
    }

    /// Most recent price history entry, if any
    pub fn last_price_change(product: &Product) -> Option<&PriceChange> {
        product.price_history.last()
    }
}
