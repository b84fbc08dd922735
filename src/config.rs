use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_addr: IpAddr,
    pub database_path: String,
    pub account_timeout_seconds: i64,
    pub sync_interval_seconds: i64,
    pub magic_max_age_days: i64,
    pub webhook: WebhookConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub repeat: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub relay_url: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub max_per_day: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;
        let bind_addr = parse_or(
            &env_map,
            "BIND_ADDR",
            IpAddr::from([127, 0, 0, 1]),
            "must be an IP address",
        )?;

        let account_timeout_seconds =
            parse_or(&env_map, "ACCOUNT_TIMEOUT_SECONDS", 60i64, "must be a valid i64")?;
        if account_timeout_seconds <= 0 {
            return Err(ConfigError::InvalidValue(
                "ACCOUNT_TIMEOUT_SECONDS".to_string(),
                "must be positive".to_string(),
            ));
        }

        let sync_interval_seconds =
            parse_or(&env_map, "SYNC_INTERVAL_SECONDS", 60i64, "must be a valid i64")?;
        let magic_max_age_days =
            parse_or(&env_map, "MAGIC_MAX_AGE_DAYS", 30i64, "must be a valid i64")?;

        let webhook = WebhookConfig {
            url: non_empty(&env_map, "ALERT_WEBHOOK_URL"),
            repeat: parse_or(&env_map, "ALERT_WEBHOOK_REPEAT", 3u32, "must be a valid u32")?,
            delay: Duration::from_millis(parse_or(
                &env_map,
                "ALERT_WEBHOOK_DELAY_MS",
                5000u64,
                "must be a valid u64",
            )?),
        };

        let mail = MailConfig {
            relay_url: non_empty(&env_map, "MAIL_RELAY_URL"),
            from: non_empty(&env_map, "MAIL_FROM").unwrap_or_else(|| "tradewatch@localhost".to_string()),
            to: non_empty(&env_map, "MAIL_TO"),
            max_per_day: parse_or(&env_map, "MAIL_MAX_PER_DAY", 10u32, "must be a valid u32")?,
        };

        Ok(Config {
            port,
            bind_addr,
            database_path,
            account_timeout_seconds,
            sync_interval_seconds,
            magic_max_age_days,
            webhook,
            mail,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expected.to_string())),
        None => Ok(default),
    }
}

fn non_empty(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
