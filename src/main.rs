use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tradewatch::orchestration::{
    spawn_alert_worker, spawn_sync_loop, AlertChannel, AlertDispatcher, MailRelayChannel,
    WebhookChannel,
};
use tradewatch::{api, config::Config, db::init_db, Repository, TradeStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database at {}", config.database_path))?;
    let store: Arc<dyn TradeStore> = Arc::new(Repository::new(pool));

    // Alert delivery runs detached from the sync loop
    let (alerts, alert_rx) = AlertDispatcher::channel();
    let mut channels: Vec<Arc<dyn AlertChannel>> = vec![Arc::new(MailRelayChannel::new(
        config.mail.relay_url.clone(),
        config.mail.from.clone(),
        config.mail.to.clone(),
        config.mail.max_per_day,
    ))];
    match &config.webhook.url {
        Some(url) => channels.push(Arc::new(WebhookChannel::new(
            url.clone(),
            config.webhook.repeat,
            config.webhook.delay,
        ))),
        None => tracing::info!("No alert webhook configured"),
    }
    spawn_alert_worker(alert_rx, channels);

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let state = api::AppState::new(store, config, alerts);

    state
        .cache
        .load()
        .await
        .context("failed to load accounts from the store")?;

    spawn_sync_loop(state.monitor.clone());

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
