//! Shared test fixtures: seeded database, wired app state, pipeline runner

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::{ConversationState, StreamEvent};
use crate::services::emitter::StreamEmitter;
use crate::{AppState, db};

pub const DATE_FROM: &str = "2025-11-01";
pub const DATE_TO: &str = "2025-11-30";

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date must parse")
}

/// One shared in-memory connection: with more, each pool connection would
/// open its own empty memory database.
pub async fn memory_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

/// In-memory database with the business schema and a November/October 2025
/// data set covering sales, inventory and conversations. A couple of
/// recent orders (relative to today) back the handler-level tests, which
/// analyze the last 30 days.
pub async fn seeded_pool() -> SqlitePool {
    let pool = memory_pool().await;
    db::create_business_schema(&pool).await.expect("schema");
    db::ensure_memory_schema(&pool).await.expect("memory schema");

    sqlx::query(
        "INSERT INTO orders (id, order_date, channel, total_amount, units) VALUES \
         (1, '2025-11-03', 'web',   100.0, 2), \
         (2, '2025-11-12', 'web',   200.0, 3), \
         (3, '2025-11-25', 'store', 300.0, 4), \
         (4, '2025-10-05', 'web',    80.0, 1), \
         (5, '2025-10-20', 'store', 120.0, 2)",
    )
    .execute(&pool)
    .await
    .expect("seed orders");

    let today = chrono::Utc::now().date_naive();
    sqlx::query(
        "INSERT INTO orders (id, order_date, channel, total_amount, units) VALUES \
         (6, ?1, 'web', 150.0, 2), \
         (7, ?2, 'store', 250.0, 3)",
    )
    .bind((today - chrono::Duration::days(3)).to_string())
    .bind((today - chrono::Duration::days(10)).to_string())
    .execute(&pool)
    .await
    .expect("seed recent orders");

    sqlx::query(
        "INSERT INTO products (id, name, category) VALUES \
         (1, 'Gift card', 'misc'), \
         (2, 'Mug', 'kitchen'), \
         (3, 'Poster', 'decor')",
    )
    .execute(&pool)
    .await
    .expect("seed products");

    sqlx::query(
        "INSERT INTO order_lines (order_id, product_id, quantity, revenue) VALUES \
         (1, 1, 2, 100.0), \
         (2, 1, 2, 150.0), \
         (2, 2, 1,  50.0), \
         (3, 3, 4, 300.0), \
         (6, 1, 2, 150.0), \
         (7, 2, 3, 250.0)",
    )
    .execute(&pool)
    .await
    .expect("seed order lines");

    sqlx::query(
        "INSERT INTO inventory (product_id, stock_on_hand, reorder_point) VALUES \
         (1, 50, 10), \
         (2,  5, 10), \
         (3, 12, 15)",
    )
    .execute(&pool)
    .await
    .expect("seed inventory");

    sqlx::query(
        "INSERT INTO conversations (started_at, channel, escalated, resolved) VALUES \
         ('2025-11-02', 'chat', 0, 1), \
         ('2025-11-10', 'chat', 1, 0), \
         ('2025-11-18', 'email', 0, 1)",
    )
    .execute(&pool)
    .await
    .expect("seed conversations");

    pool
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.engine.request_deadline_seconds = 30;
    config
}

pub async fn test_app_state() -> Arc<AppState> {
    let pool = seeded_pool().await;
    Arc::new(AppState::build(&test_config(), pool).expect("app state"))
}

pub async fn test_app_state_with_pool(pool: SqlitePool) -> Arc<AppState> {
    Arc::new(AppState::build(&test_config(), pool).expect("app state"))
}

pub fn conversation(state: &AppState, question: &str) -> ConversationState {
    ConversationState::new(
        question,
        date(DATE_FROM),
        date(DATE_TO),
        "thread-test",
        "trace-test",
        state.engine.max_retries,
    )
}

/// Run one request through the orchestrator and return the terminal state
/// plus every emitted event, in order.
pub async fn run_pipeline(
    app: &Arc<AppState>,
    question: &str,
) -> (ConversationState, Vec<StreamEvent>) {
    let conv = conversation(app, question);
    let (emitter, mut rx) = StreamEmitter::channel("msg-test");
    let cancel = CancellationToken::new();

    let orchestrator = Arc::clone(&app.orchestrator);
    let pipeline =
        tokio::spawn(async move { orchestrator.execute(conv, emitter, cancel).await });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let state = pipeline.await.expect("pipeline task");
    (state, events)
}

pub fn event_types(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::type_name).collect()
}
