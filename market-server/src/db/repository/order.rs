//! Order Repository
//!
//! Persists committed orders and clears cart lines once an order lands.
//! Stock movement never happens here; the checkout coordinator drives it
//! through the product repository.

use super::{BaseRepository, RepoError, RepoResult, strip_table_prefix};
use shared::models::{CartLine, Order, OrderStatus};
use shared::util::snowflake_id;
use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const ORDER_TABLE: &str = "order";
const CART_TABLE: &str = "cart";

#[derive(Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Persist a freshly reserved order. Returns the order with its id set.
    pub async fn create(&self, mut order: Order) -> RepoResult<Order> {
        if order.lines.is_empty() {
            return Err(RepoError::Validation("order has no lines".into()));
        }

        let key = snowflake_id().to_string();
        order.id = None;

        self.base
            .db()
            .query("CREATE type::thing($table, $key) CONTENT $data RETURN NONE")
            .bind(("table", ORDER_TABLE))
            .bind(("key", key.clone()))
            .bind(("data", order))
            .await?;

        self.find_by_id(&key)
            .await?
            .ok_or_else(|| RepoError::Database("create returned no record".into()))
    }

    /// Find order by id
    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Order>> {
        let pure_id = strip_table_prefix(ORDER_TABLE, id);
        let record = RecordId::from_table_key(ORDER_TABLE, pure_id);
        let orders: Vec<Order> = self
            .base
            .db()
            .query("SELECT *, <string>id AS id FROM $id")
            .bind(("id", record))
            .await?
            .take(0)?;
        Ok(orders.into_iter().next())
    }

    /// Transition an order's status
    pub async fn set_status(&self, id: &str, status: OrderStatus) -> RepoResult<()> {
        let pure_id = strip_table_prefix(ORDER_TABLE, id).to_string();
        let record = RecordId::from_table_key(ORDER_TABLE, &pure_id);

        let mut result = self
            .base
            .db()
            .query("UPDATE $id SET status = $status RETURN VALUE id")
            .bind(("id", record))
            .bind(("status", status))
            .await?;

        let updated: Vec<RecordId> = result.take(0)?;
        if updated.is_empty() {
            return Err(RepoError::NotFound(format!("order: {pure_id}")));
        }
        Ok(())
    }

    // ========== Cart ==========

    /// Add a cart line (used by the catalog layer and by tests)
    pub async fn add_cart_line(&self, line: CartLine) -> RepoResult<()> {
        let key = snowflake_id().to_string();
        self.base
            .db()
            .query("CREATE type::thing($table, $key) CONTENT $data RETURN NONE")
            .bind(("table", CART_TABLE))
            .bind(("key", key))
            .bind(("data", CartLine { id: None, ..line }))
            .await?;
        Ok(())
    }

    /// All cart lines for a user
    pub async fn cart_lines(&self, user_id: &str) -> RepoResult<Vec<CartLine>> {
        let lines: Vec<CartLine> = self
            .base
            .db()
            .query("SELECT *, <string>id AS id FROM cart WHERE user_id = $user")
            .bind(("user", user_id.to_string()))
            .await?
            .take(0)?;
        Ok(lines)
    }

    /// Delete every cart line belonging to the user
    pub async fn clear_cart(&self, user_id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("DELETE cart WHERE user_id = $user")
            .bind(("user", user_id.to_string()))
            .await?;
        Ok(())
    }
}
