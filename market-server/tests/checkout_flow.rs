//! End-to-end checkout flows against the embedded database.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tempfile::TempDir;

use market_server::checkout::{CheckoutCoordinator, LineRequest, OrderRequest};
use market_server::db::DbService;
use market_server::db::repository::{OrderRepository, ProductRepository};
use market_server::message::dispatcher::BroadcastDispatcher;
use market_server::message::registry::ConnectionRegistry;
use market_server::message::subscription::SubscriptionIndex;
use market_server::message::transport::MemoryTransport;
use shared::models::{CartLine, OrderStatus, ProductCreate};
use shared::{ErrorCode, EventType};

struct Harness {
    _tmp: TempDir,
    products: ProductRepository,
    orders: OrderRepository,
    registry: Arc<ConnectionRegistry>,
    coordinator: CheckoutCoordinator,
}

async fn harness() -> Harness {
    harness_with_timeout(Duration::from_secs(5)).await
}

async fn harness_with_timeout(timeout: Duration) -> Harness {
    let tmp = TempDir::new().unwrap();
    let service = DbService::new(&tmp.path().join("market.db").to_string_lossy())
        .await
        .unwrap();
    let products = ProductRepository::new(service.db.clone());
    let orders = OrderRepository::new(service.db);
    let index = Arc::new(SubscriptionIndex::new());
    let registry = Arc::new(ConnectionRegistry::new(index.clone()));
    let dispatcher = Arc::new(BroadcastDispatcher::new(registry.clone(), index, 5));
    let coordinator =
        CheckoutCoordinator::new(products.clone(), orders.clone(), dispatcher, timeout);
    Harness {
        _tmp: tmp,
        products,
        orders,
        registry,
        coordinator,
    }
}

async fn seed(h: &Harness, name: &str, stock: i64, price: Decimal) -> String {
    h.products
        .create(ProductCreate {
            name: name.into(),
            seller: Some("seller:acme".into()),
            stock,
            price,
            is_active: None,
        })
        .await
        .unwrap()
        .id
        .unwrap()
}

fn request(user: &str, lines: Vec<(&str, i64)>) -> OrderRequest {
    OrderRequest {
        user_id: user.into(),
        lines: lines
            .into_iter()
            .map(|(product_id, quantity)| LineRequest {
                product_id: product_id.into(),
                quantity,
            })
            .collect(),
    }
}

#[tokio::test]
async fn place_order_reserves_persists_and_clears_cart() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 10, Decimal::new(450, 2)).await;
    let mug = seed(&h, "Mug", 4, Decimal::new(1200, 2)).await;

    h.orders
        .add_cart_line(CartLine {
            id: None,
            user_id: "user:bob".into(),
            product_id: tea.clone(),
            quantity: 2,
        })
        .await
        .unwrap();

    let order = h
        .coordinator
        .place_order(request("user:bob", vec![(&tea, 2), (&mug, 1)]))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.lines.len(), 2);
    // 2 * 4.50 + 12.00
    assert_eq!(order.total, Decimal::new(2100, 2));

    let tea_after = h.products.find_by_id(&tea).await.unwrap().unwrap();
    let mug_after = h.products.find_by_id(&mug).await.unwrap().unwrap();
    assert_eq!(tea_after.stock, 8);
    assert_eq!(tea_after.sales_count, 2);
    assert_eq!(mug_after.stock, 3);

    assert!(h.orders.cart_lines("user:bob").await.unwrap().is_empty());

    let stored = h
        .orders
        .find_by_id(order.id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total, order.total);
}

#[tokio::test]
async fn insufficient_stock_aborts_whole_order() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 3, Decimal::new(450, 2)).await;

    let err = h
        .coordinator
        .place_order(request("user:bob", vec![(&tea, 5)]))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::StockConflict);
    assert!(err.is_retryable());

    let after = h.products.find_by_id(&tea).await.unwrap().unwrap();
    assert_eq!(after.stock, 3);
    assert_eq!(after.sales_count, 0);
}

#[tokio::test]
async fn partial_failure_releases_earlier_reservations() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 10, Decimal::new(450, 2)).await;
    let mug = seed(&h, "Mug", 1, Decimal::new(1200, 2)).await;

    let err = h
        .coordinator
        .place_order(request("user:bob", vec![(&tea, 2), (&mug, 2)]))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::StockConflict);

    // Tea was reserved first and must be fully restored
    let tea_after = h.products.find_by_id(&tea).await.unwrap().unwrap();
    assert_eq!(tea_after.stock, 10);
    assert_eq!(tea_after.sales_count, 0);
    // The restore is visible in the ledger, not silently rewritten
    assert_eq!(tea_after.stock_history.len(), 2);

    let mug_after = h.products.find_by_id(&mug).await.unwrap().unwrap();
    assert_eq!(mug_after.stock, 1);
}

#[tokio::test]
async fn concurrent_orders_for_last_unit_one_wins() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 1, Decimal::new(450, 2)).await;

    let (a, b) = tokio::join!(
        h.coordinator
            .place_order(request("user:a", vec![(&tea, 1)])),
        h.coordinator
            .place_order(request("user:b", vec![(&tea, 1)]))
    );

    let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(oks, 1, "exactly one order must win: {a:?} {b:?}");
    let loser = if a.is_ok() { b } else { a };
    assert_eq!(loser.unwrap_err().code, ErrorCode::StockConflict);

    let after = h.products.find_by_id(&tea).await.unwrap().unwrap();
    assert_eq!(after.stock, 0);
    assert_eq!(after.sales_count, 1);
}

#[tokio::test]
async fn cancel_restores_exact_quantities() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 10, Decimal::new(450, 2)).await;

    let order = h
        .coordinator
        .place_order(request("user:bob", vec![(&tea, 4)]))
        .await
        .unwrap();
    let order_id = order.id.unwrap();

    // An admin restock between order and cancel must not skew the restore
    h.products
        .set_stock(&tea, 20, "restock", "admin:root")
        .await
        .unwrap();

    let cancelled = h.coordinator.cancel_order(&order_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let after = h.products.find_by_id(&tea).await.unwrap().unwrap();
    assert_eq!(after.stock, 24);
    assert_eq!(after.sales_count, 0);

    // Cancelling again is rejected
    let err = h.coordinator.cancel_order(&order_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OrderNotPending);
}

#[tokio::test]
async fn cancel_unknown_order_is_not_found() {
    let h = harness().await;
    let err = h.coordinator.cancel_order("order:ghost").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OrderNotFound);
}

#[tokio::test]
async fn captured_price_survives_reprice() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 10, Decimal::new(500, 2)).await;

    let order = h
        .coordinator
        .place_order(request("user:bob", vec![(&tea, 1)]))
        .await
        .unwrap();

    h.products
        .reprice(&tea, Decimal::new(900, 2), "surge", "admin:root")
        .await
        .unwrap();

    let stored = h
        .orders
        .find_by_id(order.id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.lines[0].unit_price, Decimal::new(500, 2));
    assert_eq!(stored.total, Decimal::new(500, 2));
}

#[tokio::test]
async fn zero_timeout_fails_before_reserving() {
    let h = harness_with_timeout(Duration::ZERO).await;
    let tea = seed(&h, "Tea", 10, Decimal::new(450, 2)).await;

    let err = h
        .coordinator
        .place_order(request("user:bob", vec![(&tea, 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::CheckoutTimeout);
    assert!(err.is_retryable());

    let after = h.products.find_by_id(&tea).await.unwrap().unwrap();
    assert_eq!(after.stock, 10);
}

#[tokio::test]
async fn checkout_notifies_subscribers_after_commit() {
    let h = harness().await;
    let tea = seed(&h, "Tea", 10, Decimal::new(450, 2)).await;

    let (transport, mut rx) = MemoryTransport::channel();
    let conn = h.registry.register(Arc::new(transport));
    h.registry.authenticate(&conn, "user:watcher", false);
    h.registry.subscribe(&conn, &tea);

    h.coordinator
        .place_order(request("user:bob", vec![(&tea, 3)]))
        .await
        .unwrap();

    let msg = rx.recv().await.unwrap();
    assert_eq!(msg.event_type, EventType::StockUpdate);
    let payload: shared::message::StockUpdatePayload = msg.parse_payload().unwrap();
    assert_eq!((payload.previous_stock, payload.stock), (10, 7));
    assert!(payload.available);
}
