pub mod accounts;
pub mod admin;
pub mod comparison;
pub mod extract;
pub mod health;
pub mod ingest;

use crate::config::Config;
use crate::db::TradeStore;
use crate::orchestration::{
    AccountCache, AlertDispatcher, ComparisonService, RuntimeSettings, SettingsService,
    SyncMonitor,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: AccountCache,
    pub settings: SettingsService,
    pub monitor: SyncMonitor,
    pub comparison: ComparisonService,
}

impl AppState {
    /// Wire the services around one store. Runtime settings default to the
    /// values from `config` until an operator overrides them.
    pub fn new(store: Arc<dyn TradeStore>, config: Config, alerts: AlertDispatcher) -> Self {
        let defaults = RuntimeSettings {
            sync_interval_seconds: config.sync_interval_seconds,
            magic_max_age_days: config.magic_max_age_days,
            ..RuntimeSettings::default()
        };
        let cache = AccountCache::new(Arc::clone(&store));
        let settings = SettingsService::new(Arc::clone(&store), defaults);
        let monitor = SyncMonitor::new(cache.clone(), settings.clone(), alerts);
        let comparison = ComparisonService::new(store);

        Self {
            config: Arc::new(config),
            cache,
            settings,
            monitor,
            comparison,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        // Terminal reports
        .route("/api/register", post(ingest::register))
        .route("/api/trades", post(ingest::update_trades))
        .route("/api/trades-init", post(ingest::init_trades))
        .route("/api/history", post(ingest::update_history))
        .route("/api/heartbeat", post(ingest::heartbeat))
        .route("/api/client-error", post(ingest::client_error))
        // Read side
        .route("/api/accounts", get(accounts::list_accounts))
        .route("/api/accounts/:id", get(accounts::get_account))
        .route("/api/accounts/:id/details", post(accounts::update_details))
        .route("/api/trades/open", get(accounts::open_trades))
        .route("/api/drawdowns", get(accounts::drawdowns))
        .route("/api/comparison", get(comparison::get_comparison))
        .route("/api/sync/status", get(admin::sync_status))
        // Operator settings
        .route(
            "/api/admin/settings",
            get(admin::get_settings).post(admin::update_settings),
        )
        .route(
            "/api/admin/magic-mappings",
            get(admin::list_magic_mappings).post(admin::save_magic_mapping),
        )
        .route("/api/admin/stats", get(admin::stats))
        .layer(cors)
        .with_state(state)
}
