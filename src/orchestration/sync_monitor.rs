//! Periodic reconciliation of live open trades against the demo fleet.

use crate::domain::{SyncStatus, Ticket};
use crate::engine::DemoTradeIndex;
use crate::orchestration::account_cache::AccountCache;
use crate::orchestration::alerts::{Alert, AlertDispatcher};
use crate::orchestration::settings::{RuntimeSettings, SettingsService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncHealth {
    #[default]
    Ok,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetrics {
    pub last_check_time: Option<DateTime<Utc>>,
    pub next_check_time: Option<DateTime<Utc>>,
    pub status: SyncHealth,
    pub checked_count: usize,
    pub interval_seconds: i64,
}

/// Outcome of one full reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub global_warning: bool,
    pub alert_raised: bool,
    pub checked: usize,
}

#[derive(Debug, Default)]
struct MonitorState {
    last_check: Option<Instant>,
    last_check_time: Option<DateTime<Utc>>,
    warning_alert_sent: bool,
    status: SyncHealth,
    checked_count: usize,
}

#[derive(Debug, Clone)]
pub struct SyncMonitor {
    cache: AccountCache,
    settings: SettingsService,
    alerts: AlertDispatcher,
    state: Arc<Mutex<MonitorState>>,
}

impl SyncMonitor {
    pub fn new(cache: AccountCache, settings: SettingsService, alerts: AlertDispatcher) -> Self {
        Self {
            cache,
            settings,
            alerts,
            state: Arc::new(Mutex::new(MonitorState::default())),
        }
    }

    /// Run a pass if the configured interval has elapsed since the last one.
    ///
    /// The interval is re-read on every call; `<= 0` disables the loop.
    pub async fn tick(&self, now: Instant) -> Option<SyncReport> {
        let settings = self.settings.current().await;
        let interval = u64::try_from(settings.sync_interval_seconds).ok().filter(|s| *s > 0)?;

        let mut state = self.state.lock().await;
        if let Some(last) = state.last_check {
            if now.saturating_duration_since(last) < Duration::from_secs(interval) {
                return None;
            }
        }
        state.last_check = Some(now);
        Some(self.check(&mut state, &settings))
    }

    /// Run a pass immediately, regardless of the interval.
    pub async fn run_check(&self) -> SyncReport {
        let settings = self.settings.current().await;
        let mut state = self.state.lock().await;
        state.last_check = Some(Instant::now());
        self.check(&mut state, &settings)
    }

    fn check(&self, state: &mut MonitorState, settings: &RuntimeSettings) -> SyncReport {
        let accounts = self.cache.snapshot();
        let demo_index = DemoTradeIndex::new(
            accounts
                .iter()
                .filter(|a| a.is_demo())
                .flat_map(|a| a.open_trades.iter()),
        );

        let mut checked = 0;
        let mut warnings: Vec<String> = Vec::new();

        for account in &accounts {
            if !account.is_real() {
                self.cache.clear_sync_state(account.id);
                continue;
            }

            let statuses: HashMap<Ticket, SyncStatus> = account
                .open_trades
                .iter()
                .filter(|t| !settings.sync_exempt_magics.contains(&t.magic_number))
                .map(|t| (t.ticket, demo_index.classify(t)))
                .collect();
            checked += statuses.len();

            if self.cache.apply_sync_statuses(account.id, &statuses) {
                let mut tickets: Vec<i64> = statuses
                    .iter()
                    .filter(|(_, s)| **s == SyncStatus::Warning)
                    .map(|(t, _)| t.as_i64())
                    .collect();
                tickets.sort_unstable();
                warnings.push(format!(
                    "{} ({}): tickets {:?}",
                    account.display_name(),
                    account.id,
                    tickets
                ));
            }
        }

        let global_warning = !warnings.is_empty();
        let mut alert_raised = false;

        if global_warning {
            state.status = SyncHealth::Warning;
            if !state.warning_alert_sent {
                warn!(accounts = warnings.len(), "Unsynchronized live trades detected");
                alert_raised = self.raise_alert(&warnings, settings);
                state.warning_alert_sent = true;
            }
        } else {
            if state.warning_alert_sent {
                info!("All live trades synchronized again");
            }
            state.status = SyncHealth::Ok;
            state.warning_alert_sent = false;
        }

        state.checked_count = checked;
        state.last_check_time = Some(Utc::now());
        debug!(checked, demo_trades = demo_index.len(), global_warning, "Sync check complete");

        SyncReport {
            global_warning,
            alert_raised,
            checked,
        }
    }

    fn raise_alert(&self, warnings: &[String], settings: &RuntimeSettings) -> bool {
        if !settings.alert_email_on_sync && !settings.alert_webhook_on_sync {
            info!("Sync alerts disabled, not notifying");
            return false;
        }

        let alert = Alert {
            subject: "Trade monitor: unsynchronized live trades".to_string(),
            body: format!(
                "Live trades without a matching demo trade were found:\n{}\nPlease check the dashboard.",
                warnings.join("\n")
            ),
            email: settings.alert_email_on_sync,
            webhook: settings.alert_webhook_on_sync,
        };

        match self.alerts.dispatch(alert) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to enqueue sync alert");
                false
            }
        }
    }

    pub async fn metrics(&self) -> SyncMetrics {
        let interval = self.settings.current().await.sync_interval_seconds;
        let state = self.state.lock().await;
        SyncMetrics {
            last_check_time: state.last_check_time,
            next_check_time: state
                .last_check_time
                .map(|t| t + chrono::Duration::seconds(interval.max(0))),
            status: state.status,
            checked_count: state.checked_count,
            interval_seconds: interval,
        }
    }
}

/// Drive the monitor with a one-second tick until the runtime shuts down.
pub fn spawn_sync_loop(monitor: SyncMonitor) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Sync monitor started");
        loop {
            let now = ticker.tick().await;
            if let Some(report) = monitor.tick(now).await {
                debug!(?report, "Sync tick");
            }
        }
    })
}
