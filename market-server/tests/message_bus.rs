//! Full message bus round trip over real TCP.

use std::time::Duration;

use rust_decimal::Decimal;

use market_server::core::{Config, ServerState};
use market_server::db::DbService;
use market_server::message::transport::{TcpTransport, Transport};
use shared::message::{
    AuthPayload, AuthResultPayload, BusMessage, StockUpdatePayload, SubscribePayload,
    UpdateStockPayload,
};
use shared::models::ProductCreate;
use shared::{ErrorCode, EventType};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_server() -> (ServerState, market_server::core::BackgroundTasks, String) {
    let port = free_port();
    let tmp = std::env::temp_dir();
    let config = Config::with_overrides(tmp.to_string_lossy(), port);
    let service = DbService::memory().await.unwrap();
    let state = ServerState::with_db(&config, service.db);
    let tasks = state.start_background_tasks();

    // Wait for the listener to come up
    let addr = format!("127.0.0.1:{}", port);
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(&addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (state, tasks, addr)
}

async fn recv(transport: &TcpTransport) -> BusMessage {
    tokio::time::timeout(Duration::from_secs(2), transport.read_message())
        .await
        .expect("timed out waiting for frame")
        .expect("read failed")
}

/// Read frames until one of the given type arrives
async fn recv_type(transport: &TcpTransport, event_type: EventType) -> BusMessage {
    loop {
        let msg = recv(transport).await;
        if msg.event_type == event_type {
            return msg;
        }
    }
}

#[tokio::test]
async fn auth_subscribe_and_receive_stock_update() {
    let (state, tasks, addr) = start_server().await;

    let tea = state
        .products
        .create(ProductCreate {
            name: "Tea".into(),
            seller: None,
            stock: 10,
            price: Decimal::new(450, 2),
            is_active: None,
        })
        .await
        .unwrap()
        .id
        .unwrap();

    // Subscriber client
    let client = TcpTransport::connect(&addr).await.unwrap();
    client
        .write_message(&BusMessage::auth(&AuthPayload {
            user_id: "user:bob".into(),
            is_admin: false,
        }))
        .await
        .unwrap();
    let reply = recv(&client).await;
    assert_eq!(reply.event_type, EventType::AuthResult);
    let payload: AuthResultPayload = reply.parse_payload().unwrap();
    assert!(payload.success);

    client
        .write_message(&BusMessage::subscribe(&SubscribePayload {
            product_id: tea.clone(),
        }))
        .await
        .unwrap();
    let confirmed = recv(&client).await;
    assert_eq!(confirmed.event_type, EventType::SubscriptionConfirmed);

    // Admin client changes the stock
    let admin = TcpTransport::connect(&addr).await.unwrap();
    admin
        .write_message(&BusMessage::auth(&AuthPayload {
            user_id: "admin:root".into(),
            is_admin: true,
        }))
        .await
        .unwrap();
    recv_type(&admin, EventType::AuthResult).await;
    admin
        .write_message(&BusMessage::update_stock(&UpdateStockPayload {
            product_id: tea.clone(),
            new_stock: 2,
            reason: "correction".into(),
        }))
        .await
        .unwrap();

    let update = recv_type(&client, EventType::StockUpdate).await;
    let payload: StockUpdatePayload = update.parse_payload().unwrap();
    assert_eq!(payload.product_id, tea);
    assert_eq!((payload.previous_stock, payload.stock), (10, 2));

    // The admin sees the low stock alert, then the raw mutation feed
    recv_type(&admin, EventType::LowStockAlert).await;
    let feed = recv_type(&admin, EventType::AdminFeed).await;
    let feed_payload: shared::message::AdminFeedPayload = feed.parse_payload().unwrap();
    assert_eq!(feed_payload.stock, Some(2));

    tasks.shutdown().await;
}

#[tokio::test]
async fn unauthenticated_subscribe_gets_error_frame_and_stays_connected() {
    let (_state, tasks, addr) = start_server().await;

    let client = TcpTransport::connect(&addr).await.unwrap();
    client
        .write_message(&BusMessage::subscribe(&SubscribePayload {
            product_id: "product:tea".into(),
        }))
        .await
        .unwrap();

    let reply = recv(&client).await;
    assert_eq!(reply.event_type, EventType::Error);
    let payload: shared::message::ErrorPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.code, ErrorCode::NotAuthenticated);

    // Connection survives the error; auth still works afterwards
    client
        .write_message(&BusMessage::auth(&AuthPayload {
            user_id: "user:bob".into(),
            is_admin: false,
        }))
        .await
        .unwrap();
    let reply = recv(&client).await;
    assert_eq!(reply.event_type, EventType::AuthResult);

    tasks.shutdown().await;
}

#[tokio::test]
async fn disconnect_cleans_up_registry() {
    let (state, tasks, addr) = start_server().await;

    let client = TcpTransport::connect(&addr).await.unwrap();
    client
        .write_message(&BusMessage::auth(&AuthPayload {
            user_id: "user:bob".into(),
            is_admin: false,
        }))
        .await
        .unwrap();
    recv_type(&client, EventType::AuthResult).await;
    assert_eq!(state.registry.connection_count(), 1);

    client.close().await.unwrap();
    for _ in 0..50 {
        if state.registry.connection_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.connection_count(), 0);

    tasks.shutdown().await;
}
