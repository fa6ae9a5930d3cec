use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use spotbook::clock::SystemClock;
use spotbook::config::EngineConfig;
use spotbook::engine::Engine;
use spotbook::notify::NotifyHub;
use spotbook::service::Service;
use spotbook::wire::{self, SpotbookFactory};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("spotbook_int_test_{}", Ulid::new()));
    let engine = Engine::new(dir.join("spotbook.wal"), EngineConfig::default(), Arc::new(SystemClock)).unwrap();
    let service = Arc::new(Service::new(Arc::new(engine), Arc::new(NotifyHub::default())));
    let factory = Arc::new(SpotbookFactory::new(service, "spotbook".into(), "spotbook-admin".into()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    addr
}

async fn connect_as(addr: SocketAddr, user: &str, password: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("spotbook")
        .user(user)
        .password(password);
    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(connection);
    client
}

/// A fresh user with their own connection.
async fn user(addr: SocketAddr) -> (Ulid, Client) {
    let id = Ulid::new();
    (id, connect_as(addr, &id.to_string(), "spotbook").await)
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.expect_err("statement should fail");
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

fn col(row: &SimpleQueryRow, name: &str) -> String {
    row.get(name).unwrap_or_default().to_string()
}

/// `HH:00` UTC, `days` days from now, as RFC 3339.
fn future(days: i64, hour: u32) -> String {
    (Utc::now() + TimeDelta::days(days)).format(&format!("%Y-%m-%dT{hour:02}:00:00Z")).to_string()
}

async fn list_spot(client: &Client, label: &str, price: &str) -> String {
    let rows = rows(
        client,
        &format!("INSERT INTO spots (label, price_per_hour, address) VALUES ('{label}', {price}, '1 Dock Road')"),
    )
    .await;
    col(&rows[0], "id")
}

async fn publish(client: &Client, spot: &str, start: &str, end: &str) -> String {
    let rows = rows(
        client,
        &format!("INSERT INTO windows (spot_id, start, \"end\") VALUES ('{spot}', '{start}', '{end}')"),
    )
    .await;
    col(&rows[0], "id")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn list_publish_search_book() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (consumer_id, consumer) = user(addr).await;

    let spot = list_spot(&supplier, "A-1", "10").await;
    let window = publish(&supplier, &spot, &future(2, 9), &future(2, 11)).await;

    let found = rows(&consumer, "SELECT * FROM windows").await;
    assert!(found.iter().any(|r| col(r, "id") == window));

    let quote = rows(&consumer, &format!("SELECT * FROM quotes WHERE window_id = '{window}'")).await;
    assert_eq!(Decimal::from_str(&col(&quote[0], "total_price")).unwrap(), Decimal::from(20));

    let receipt = rows(&consumer, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;
    let booking = col(&receipt[0], "id");
    assert_eq!(Decimal::from_str(&col(&receipt[0], "total_price")).unwrap(), Decimal::from(20));

    let mine = rows(&consumer, "SELECT * FROM bookings").await;
    assert_eq!(mine.len(), 1);
    assert_eq!(col(&mine[0], "id"), booking);
    assert_eq!(col(&mine[0], "consumer_id"), consumer_id.to_string());
    assert_eq!(col(&mine[0], "status"), "pending");

    let incoming = rows(&supplier, "SELECT * FROM bookings WHERE supplier = true").await;
    assert_eq!(incoming.len(), 1);

    let after = rows(&consumer, "SELECT * FROM windows").await;
    assert!(after.iter().all(|r| col(r, "id") != window), "booked window left in search");
}

#[tokio::test]
async fn second_booking_of_a_window_is_refused() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, first) = user(addr).await;
    let (_, second) = user(addr).await;

    let spot = list_spot(&supplier, "A-2", "4.50").await;
    let window = publish(&supplier, &spot, &future(3, 8), &future(3, 9)).await;

    rows(&first, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;
    let code = sqlstate(&second, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;
    assert_eq!(code, "23P01");
}

#[tokio::test]
async fn booked_window_cannot_be_released_by_supplier() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, consumer) = user(addr).await;
    let (_, latecomer) = user(addr).await;
    let spot = list_spot(&supplier, "A-9", "4").await;
    let window = publish(&supplier, &spot, &future(3, 12), &future(3, 13)).await;
    rows(&consumer, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;

    let code = sqlstate(&supplier, &format!("DELETE FROM claims WHERE window_id = '{window}'")).await;
    assert_eq!(code, "23P01");
    let code = sqlstate(&latecomer, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;
    assert_eq!(code, "23P01");
}

#[tokio::test]
async fn supplier_cannot_book_own_spot() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let spot = list_spot(&supplier, "A-3", "3").await;
    let window = publish(&supplier, &spot, &future(2, 14), &future(2, 15)).await;

    let code = sqlstate(&supplier, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;
    assert_eq!(code, "42501");
}

#[tokio::test]
async fn pay_then_cancel_frees_window() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, consumer) = user(addr).await;
    let spot = list_spot(&supplier, "A-4", "8").await;
    let window = publish(&supplier, &spot, &future(4, 10), &future(4, 12)).await;

    let receipt = rows(&consumer, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;
    let booking = col(&receipt[0], "id");

    consumer
        .batch_execute(&format!("INSERT INTO payments (booking_id) VALUES ('{booking}')"))
        .await
        .unwrap();
    let confirmed = rows(&consumer, "SELECT * FROM bookings WHERE status = 'confirmed'").await;
    assert_eq!(confirmed.len(), 1);
    assert_eq!(col(&confirmed[0], "payment"), "paid");

    consumer
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{booking}'"))
        .await
        .unwrap();
    let view = rows(&consumer, &format!("SELECT * FROM windows WHERE id = '{window}'")).await;
    assert!(matches!(col(&view[0], "booked").as_str(), "f" | "false"));
}

#[tokio::test]
async fn strangers_cannot_touch_others_rows() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, stranger) = user(addr).await;
    let spot = list_spot(&supplier, "A-5", "2").await;

    let code = sqlstate(
        &stranger,
        &format!("INSERT INTO windows (spot_id, start, \"end\") VALUES ('{spot}', '{}', '{}')", future(1, 9), future(1, 10)),
    )
    .await;
    assert_eq!(code, "42501");
    assert_eq!(sqlstate(&stranger, &format!("DELETE FROM spots WHERE id = '{spot}'")).await, "42501");
}

#[tokio::test]
async fn subscriber_receives_alert_on_publish() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, watcher) = user(addr).await;
    let spot = list_spot(&supplier, "A-6", "6").await;

    rows(&watcher, &format!("INSERT INTO subscriptions (spot_id) VALUES ('{spot}')")).await;
    assert_eq!(rows(&watcher, "SELECT * FROM subscriptions").await.len(), 1);

    let window = publish(&supplier, &spot, &future(5, 7), &future(5, 9)).await;

    let alerts = rows(&watcher, "SELECT * FROM alerts").await;
    assert_eq!(alerts.len(), 1);
    assert!(col(&alerts[0], "text").contains(&window));

    // One-shot: the subscription is spent and the mailbox drained.
    assert!(rows(&watcher, "SELECT * FROM subscriptions").await.is_empty());
    assert!(rows(&watcher, "SELECT * FROM alerts").await.is_empty());
}

#[tokio::test]
async fn supplier_is_told_about_bookings() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, consumer) = user(addr).await;
    let spot = list_spot(&supplier, "A-7", "5").await;
    let window = publish(&supplier, &spot, &future(2, 16), &future(2, 17)).await;
    rows(&consumer, &format!("INSERT INTO bookings (window_id) VALUES ('{window}')")).await;

    let alerts = rows(&supplier, "SELECT * FROM alerts").await;
    assert_eq!(alerts.len(), 1);
    assert!(col(&alerts[0], "text").contains("A-7"));
}

#[tokio::test]
async fn statistics_need_admin() {
    let addr = start_test_server().await;
    let (user_id, client) = user(addr).await;
    assert_eq!(sqlstate(&client, "SELECT * FROM stats").await, "42501");

    let own = rows(&client, &format!("SELECT * FROM stats WHERE user_id = '{user_id}'")).await;
    assert_eq!(col(&own[0], "total_bookings"), "0");

    let admin = connect_as(addr, &format!("{}@admin", Ulid::new()), "spotbook-admin").await;
    let stats = rows(&admin, "SELECT * FROM stats").await;
    assert_eq!(stats.len(), 1);
    assert_eq!(Decimal::from_str(&col(&stats[0], "revenue")).unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn user_name_must_be_an_id() {
    let addr = start_test_server().await;
    let client = connect_as(addr, "alice", "spotbook").await;
    assert_eq!(sqlstate(&client, "SELECT * FROM windows").await, "28000");
}

#[tokio::test]
async fn bad_sql_is_a_syntax_error() {
    let addr = start_test_server().await;
    let (_, client) = user(addr).await;
    assert_eq!(sqlstate(&client, "SELECT * FROM parking_lots").await, "42601");
    assert_eq!(sqlstate(&client, "UPDATE spots SET label = 'x'").await, "42601");
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let addr = start_test_server().await;
    let (_, supplier) = user(addr).await;
    let (_, consumer) = user(addr).await;
    let spot = list_spot(&supplier, "A-8", "12").await;
    let window = publish(&supplier, &spot, &future(6, 9), &future(6, 10)).await;

    let row = consumer
        .query_one("SELECT * FROM windows WHERE id = $1", &[&window])
        .await
        .unwrap();
    let label: String = row.get("label");
    assert_eq!(label, "A-8");

    let row = consumer
        .query_one("INSERT INTO bookings (window_id) VALUES ($1)", &[&window])
        .await
        .unwrap();
    let total: String = row.get("total_price");
    assert_eq!(Decimal::from_str(&total).unwrap(), Decimal::from(12));
}
