//! End-to-end scenarios driven through the HTTP surface: open-trade
//! reconciliation with alert latching, history dedup across overlapping
//! batches, and closed-trade comparison.

use axum::http::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use tradewatch::api;
use tradewatch::config::Config;
use tradewatch::db::init_db;
use tradewatch::orchestration::{Alert, AlertDispatcher};
use tradewatch::{AccountId, Repository, TradeStore, Ticket};

struct TestApp {
    app: axum::Router,
    state: api::AppState,
    alerts: mpsc::UnboundedReceiver<Alert>,
    _temp: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("e2e.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let store: Arc<dyn TradeStore> = Arc::new(Repository::new(pool));

    let mut env = HashMap::new();
    env.insert("DATABASE_PATH".to_string(), db_path);
    let config = Config::from_env_map(env).unwrap();

    let (dispatcher, alerts) = AlertDispatcher::channel();
    let state = api::AppState::new(store, config, dispatcher);
    let app = api::create_router(state.clone());

    TestApp {
        app,
        state,
        alerts,
        _temp: temp_dir,
    }
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> Value {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK, "POST {}", uri);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> Value {
    let req = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK, "GET {}", uri);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(app: &axum::Router, id: i64, account_type: &str) {
    post(
        app,
        "/api/register",
        json!({"accountId": id, "broker": "Broker", "currency": "EUR", "balance": 1000.0}),
    )
    .await;
    post(
        app,
        &format!("/api/accounts/{}/details", id),
        json!({"type": account_type}),
    )
    .await;
}

fn open_trade(ticket: i64, symbol: &str, side: &str) -> Value {
    json!({
        "ticket": ticket,
        "symbol": symbol,
        "type": side,
        "volume": 0.1,
        "openPrice": 1.1,
        "openTime": "2026.01.01 10:00:00",
        "profit": -25.0,
        "magicNumber": 77
    })
}

fn closed_trade(ticket: i64, side: &str, open_time: &str, open_price: f64, close_price: f64) -> Value {
    json!({
        "ticket": ticket,
        "symbol": "EURUSD",
        "type": side,
        "volume": 0.1,
        "openPrice": open_price,
        "closePrice": close_price,
        "openTime": open_time,
        "closeTime": "2026.01.01 12:00:00",
        "profit": 1.0,
        "magicNumber": 77
    })
}

#[tokio::test]
async fn test_reconciliation_tags_trades_and_alerts_once() {
    let mut t = setup_test_app().await;

    register(&t.app, 1001, "REAL").await;
    post(
        &t.app,
        "/api/trades",
        json!({
            "accountId": 1001,
            "equity": 950.0,
            "balance": 1000.0,
            "trades": [open_trade(5, "EURUSD", "BUY"), open_trade(6, "GBPUSD", "SELL")]
        }),
    )
    .await;

    register(&t.app, 2001, "DEMO").await;
    post(
        &t.app,
        "/api/trades",
        json!({
            "accountId": 2001,
            "equity": 1000.0,
            "balance": 1000.0,
            "trades": [open_trade(9, "EURUSD", "BUY")]
        }),
    )
    .await;

    let report = t.state.monitor.run_check().await;
    assert!(report.global_warning);
    assert!(report.alert_raised);
    assert_eq!(report.checked, 2);

    let rows = get(&t.app, "/api/trades/open").await;
    let status_of = |ticket: i64| {
        rows.as_array()
            .unwrap()
            .iter()
            .find(|r| r["accountId"] == 1001 && r["ticket"] == ticket)
            .map(|r| r["syncStatus"].clone())
            .unwrap()
    };
    assert_eq!(status_of(5), "MATCHED");
    assert_eq!(status_of(6), "WARNING");
    assert_eq!(rows[0]["isReal"], true);

    let accounts = get(&t.app, "/api/accounts").await;
    let live = accounts
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["id"] == 1001)
        .unwrap();
    assert_eq!(live["syncWarning"], true);

    let status = get(&t.app, "/api/sync/status").await;
    assert_eq!(status["status"], "WARNING");
    assert_eq!(status["checkedCount"], 2);

    // Persisting warning does not re-alert
    assert!(!t.state.monitor.run_check().await.alert_raised);
    let alert = t.alerts.try_recv().unwrap();
    assert!(alert.body.contains("1001"));
    assert!(t.alerts.try_recv().is_err());

    let drawdowns = get(&t.app, "/api/drawdowns").await;
    assert_eq!(drawdowns[0]["accountId"], 1001);
    assert_eq!(drawdowns[0]["drawdown"], 50.0);
    assert_eq!(drawdowns[0]["drawdownPercent"], 5.0);
}

#[tokio::test]
async fn test_history_resubmission_inserts_only_new_tickets() {
    let t = setup_test_app().await;
    register(&t.app, 1001, "REAL").await;

    let batch = |tickets: &[i64]| {
        json!({
            "accountId": 1001,
            "closedTrades": tickets
                .iter()
                .map(|&n| closed_trade(n, "BUY", "2026.01.01 10:00:00", 1.1, 1.2))
                .collect::<Vec<_>>()
        })
    };

    let first = post(&t.app, "/api/history", batch(&[1, 2, 3])).await;
    assert_eq!(first["newTradesInserted"], 3);

    let second = post(&t.app, "/api/history", batch(&[2, 3, 4])).await;
    assert_eq!(second["historyReceived"], 3);
    assert_eq!(second["newTradesInserted"], 1);

    let mut stored: Vec<Ticket> = t
        .state
        .cache
        .store()
        .load_closed_trades(AccountId::new(1001))
        .await
        .unwrap()
        .into_iter()
        .map(|trade| trade.ticket)
        .collect();
    stored.sort();
    assert_eq!(stored, [1, 2, 3, 4].map(Ticket::new).to_vec());

    let cached = t.state.cache.get(AccountId::new(1001)).unwrap();
    assert_eq!(cached.closed_trades.len(), 4);
}

#[tokio::test]
async fn test_comparison_reports_slippage_and_missing_counterparts() {
    let t = setup_test_app().await;
    register(&t.app, 1001, "REAL").await;
    register(&t.app, 2001, "DEMO").await;

    post(
        &t.app,
        "/api/history",
        json!({
            "accountId": 1001,
            "closedTrades": [
                closed_trade(1, "BUY", "2026.01.01 10:00:05", 1.2005, 1.2100),
                closed_trade(2, "SELL", "2026.01.01 11:00:00", 1.2005, 1.2100)
            ]
        }),
    )
    .await;
    post(
        &t.app,
        "/api/history",
        json!({
            "accountId": 2001,
            "closedTrades": [closed_trade(10, "BUY", "2026.01.01 10:00:00", 1.2000, 1.2100)]
        }),
    )
    .await;

    let results = get(&t.app, "/api/comparison?accountId=1001&period=all").await;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);

    let matched = results
        .iter()
        .find(|r| r["realTrade"]["ticket"] == 1)
        .unwrap();
    assert_eq!(matched["status"], "MATCHED");
    assert_eq!(matched["demoAccountId"], 2001);
    assert_eq!(matched["openDelaySeconds"], 5);
    assert_eq!(matched["openSlippage"], 0.0005);
    assert_eq!(matched["closeSlippageFormatted"], "0");

    let missing = results
        .iter()
        .find(|r| r["realTrade"]["ticket"] == 2)
        .unwrap();
    assert_eq!(missing["status"], "NOT FOUND");
    assert!(missing["demoTrade"].is_null());
}
