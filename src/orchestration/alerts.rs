//! Alert queue and delivery channels.
//!
//! The reconciliation loop only enqueues; a separate worker task fans each
//! alert out to the configured channels. Delivery failures are logged and
//! never reach the producer.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A notification for the operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub email: bool,
    pub webhook: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Email,
    Webhook,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Email => f.write_str("email"),
            AlertKind::Webhook => f.write_str("webhook"),
        }
    }
}

impl Alert {
    fn wants(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::Email => self.email,
            AlertKind::Webhook => self.webhook,
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status} from alert endpoint")]
    Http { status: u16 },
    #[error("daily email limit reached ({sent}/{max})")]
    DailyLimit { sent: u32, max: u32 },
    #[error("alert queue closed")]
    QueueClosed,
}

/// A delivery mechanism for alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync + fmt::Debug {
    fn kind(&self) -> AlertKind;

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Producer side of the alert queue.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: mpsc::UnboundedSender<Alert>,
}

impl AlertDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue without waiting for delivery.
    ///
    /// # Errors
    /// Returns `AlertError::QueueClosed` when the worker is gone.
    pub fn dispatch(&self, alert: Alert) -> Result<(), AlertError> {
        self.tx.send(alert).map_err(|_| AlertError::QueueClosed)
    }
}

/// Drain the queue, delivering every alert to each channel it asks for.
///
/// Each delivery runs in its own task so a slow endpoint does not hold up
/// the other channels or the next alert.
pub fn spawn_alert_worker(
    mut rx: mpsc::UnboundedReceiver<Alert>,
    channels: Vec<Arc<dyn AlertChannel>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            let alert = Arc::new(alert);
            for channel in channels.iter().filter(|c| alert.wants(c.kind())) {
                let channel = Arc::clone(channel);
                let alert = Arc::clone(&alert);
                tokio::spawn(async move {
                    match channel.deliver(&alert).await {
                        Ok(()) => info!(channel = %channel.kind(), subject = %alert.subject, "Alert delivered"),
                        Err(e) => error!(channel = %channel.kind(), error = %e, "Alert delivery failed"),
                    }
                });
            }
        }
        info!("Alert queue closed, worker stopping");
    })
}

// ===== Webhook channel =====

/// Fires a GET at a fixed URL `repeat` times with `delay` between attempts.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: Client,
    url: String,
    repeat: u32,
    delay: Duration,
    max_retry_elapsed: Duration,
}

impl WebhookChannel {
    pub fn new(url: String, repeat: u32, delay: Duration) -> Self {
        Self {
            client: Client::new(),
            url,
            repeat: repeat.max(1),
            delay,
            max_retry_elapsed: Duration::from_secs(10),
        }
    }

    async fn fire_once(&self) -> Result<(), AlertError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(AlertError::Network(e.to_string())))?;

            let status = response.status();
            if status.is_server_error() || status == 429 {
                return Err(backoff::Error::transient(AlertError::Http {
                    status: status.as_u16(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(AlertError::Http {
                    status: status.as_u16(),
                }));
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> AlertKind {
        AlertKind::Webhook
    }

    /// Succeeds if at least one of the attempts went through.
    async fn deliver(&self, _alert: &Alert) -> Result<(), AlertError> {
        let mut last_error = None;
        let mut delivered = false;

        for attempt in 1..=self.repeat {
            info!(attempt, repeat = self.repeat, url = %self.url, "Triggering webhook");
            match self.fire_once().await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(attempt, error = %e, "Webhook attempt failed");
                    last_error = Some(e);
                }
            }
            if attempt < self.repeat {
                tokio::time::sleep(self.delay).await;
            }
        }

        match (delivered, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

// ===== Mail relay channel =====

/// Per-day send counter that resets when the local date changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyQuota {
    day: NaiveDate,
    sent: u32,
    max: u32,
}

impl DailyQuota {
    pub fn new(max: u32, today: NaiveDate) -> Self {
        Self { day: today, sent: 0, max }
    }

    /// # Errors
    /// Returns `AlertError::DailyLimit` once `max` sends were recorded today.
    pub fn check(&mut self, today: NaiveDate) -> Result<(), AlertError> {
        if today != self.day {
            self.day = today;
            self.sent = 0;
        }
        if self.sent >= self.max {
            return Err(AlertError::DailyLimit {
                sent: self.sent,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn record(&mut self) {
        self.sent += 1;
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Sends email through an HTTP mail relay.
///
/// Delivery is skipped when no relay or recipient is configured.
#[derive(Debug)]
pub struct MailRelayChannel {
    client: Client,
    relay_url: Option<String>,
    from: String,
    to: Option<String>,
    quota: Mutex<DailyQuota>,
}

impl MailRelayChannel {
    pub fn new(relay_url: Option<String>, from: String, to: Option<String>, max_per_day: u32) -> Self {
        Self {
            client: Client::new(),
            relay_url: relay_url.filter(|u| !u.trim().is_empty()),
            from,
            to: to.filter(|t| !t.trim().is_empty()),
            quota: Mutex::new(DailyQuota::new(max_per_day, Local::now().date_naive())),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.relay_url.is_some() && self.to.is_some()
    }

    pub async fn sent_today(&self) -> u32 {
        self.quota.lock().await.sent()
    }
}

#[async_trait]
impl AlertChannel for MailRelayChannel {
    fn kind(&self) -> AlertKind {
        AlertKind::Email
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let (Some(relay_url), Some(to)) = (self.relay_url.as_deref(), self.to.as_deref()) else {
            warn!(subject = %alert.subject, "Mail relay or recipient not configured, skipping email");
            return Ok(());
        };

        let mut quota = self.quota.lock().await;
        quota.check(Local::now().date_naive())?;

        let request = MailRequest {
            from: &self.from,
            to,
            subject: &alert.subject,
            body: &alert.body,
        };
        let response = self
            .client
            .post(relay_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AlertError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Http {
                status: status.as_u16(),
            });
        }

        quota.record();
        info!(to = %to, sent_today = quota.sent(), "Warning email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct RecordingChannel {
        kind: AlertKind,
        delivered: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn kind(&self) -> AlertKind {
            self.kind
        }

        async fn deliver(&self, _alert: &Alert) -> Result<(), AlertError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AlertError::Network("boom".to_string()));
            }
            Ok(())
        }
    }

    fn alert(email: bool, webhook: bool) -> Alert {
        Alert {
            subject: "Sync warning".to_string(),
            body: "details".to_string(),
            email,
            webhook,
        }
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_worker_routes_by_channel_kind() {
        let emails = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(AtomicUsize::new(0));
        let channels: Vec<Arc<dyn AlertChannel>> = vec![
            Arc::new(RecordingChannel {
                kind: AlertKind::Email,
                delivered: emails.clone(),
                fail: false,
            }),
            Arc::new(RecordingChannel {
                kind: AlertKind::Webhook,
                delivered: hooks.clone(),
                fail: true,
            }),
        ];

        let (dispatcher, rx) = AlertDispatcher::channel();
        let worker = spawn_alert_worker(rx, channels);

        dispatcher.dispatch(alert(true, false)).unwrap();
        dispatcher.dispatch(alert(true, true)).unwrap();
        wait_for(&emails, 2).await;
        wait_for(&hooks, 1).await;

        assert_eq!(emails.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);

        drop(dispatcher);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_after_worker_gone() {
        let (dispatcher, rx) = AlertDispatcher::channel();
        drop(rx);
        assert!(matches!(
            dispatcher.dispatch(alert(true, true)),
            Err(AlertError::QueueClosed)
        ));
    }

    #[test]
    fn test_daily_quota_resets_on_new_day() {
        let day1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let mut quota = DailyQuota::new(2, day1);

        quota.check(day1).unwrap();
        quota.record();
        quota.check(day1).unwrap();
        quota.record();
        assert!(matches!(
            quota.check(day1),
            Err(AlertError::DailyLimit { sent: 2, max: 2 })
        ));

        quota.check(day2).unwrap();
        assert_eq!(quota.sent(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_mail_is_skipped() {
        let channel = MailRelayChannel::new(None, "monitor@example.com".to_string(), Some(" ".to_string()), 5);
        assert!(!channel.is_configured());
        channel.deliver(&alert(true, false)).await.unwrap();
        assert_eq!(channel.sent_today().await, 0);
    }
}
