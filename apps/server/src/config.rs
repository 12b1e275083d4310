use std::str::FromStr;
use std::time::Duration;

use calwatch_core::constants::{
    DEFAULT_DISPATCHER_QUEUE_DEPTH, DEFAULT_TELLURIC_BATCH_SIZE,
    DEFAULT_TELLURIC_CONNECTIONS_LIMIT, DEFAULT_TOPIC_BACKLOG,
};
use calwatch_core::errors::{Error, Result};
use calwatch_core::tasks::RestartPolicy;
use calwatch_core::telluric::PollingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// Identity the orchestrator acts as when it writes.
    pub service_user: String,
    pub topic_backlog: usize,
    pub dispatcher_queue_depth: usize,
    pub max_calibration_connections: u32,
    pub telluric: PollingConfig,
    /// The telluric daemon only runs when this is set.
    pub telluric_service_url: Option<String>,
    pub outbox_poll_interval: Duration,
    pub restart_policy: RestartPolicy,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let service_user = var("CALWATCH_SERVICE_USER")
            .ok_or_else(|| Error::MissingConfigKey("CALWATCH_SERVICE_USER".to_string()))?;

        let telluric = PollingConfig {
            poll_period: Duration::from_millis(parse_positive(
                &var,
                "CALWATCH_TELLURIC_POLL_PERIOD_MS",
                60_000u64,
            )?),
            batch_size: parse_positive(
                &var,
                "CALWATCH_TELLURIC_BATCH_SIZE",
                DEFAULT_TELLURIC_BATCH_SIZE,
            )?,
            connections_limit: parse_positive(
                &var,
                "CALWATCH_TELLURIC_CONNECTIONS_LIMIT",
                DEFAULT_TELLURIC_CONNECTIONS_LIMIT,
            )?,
        };

        let restart_policy = RestartPolicy {
            max_restarts: parse(&var, "CALWATCH_TASK_MAX_RESTARTS", 3u32)?,
            backoff: Duration::from_millis(parse(
                &var,
                "CALWATCH_TASK_RESTART_BACKOFF_MS",
                1_000u64,
            )?),
        };

        let log_format = match var("CALWATCH_LOG_FORMAT") {
            None => LogFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("text") => LogFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) => {
                return Err(Error::InvalidConfigValue(format!(
                    "CALWATCH_LOG_FORMAT must be 'text' or 'json', got '{}'",
                    v
                )))
            }
        };

        Ok(Self {
            db_path: var("CALWATCH_DB_PATH").unwrap_or_else(|| "./db/calwatch.db".into()),
            service_user,
            topic_backlog: parse_positive(&var, "CALWATCH_TOPIC_BACKLOG", DEFAULT_TOPIC_BACKLOG)?,
            dispatcher_queue_depth: parse_positive(
                &var,
                "CALWATCH_DISPATCHER_QUEUE_DEPTH",
                DEFAULT_DISPATCHER_QUEUE_DEPTH,
            )?,
            max_calibration_connections: parse_positive(
                &var,
                "CALWATCH_MAX_CALIBRATION_CONNECTIONS",
                8u32,
            )?,
            telluric,
            telluric_service_url: var("CALWATCH_TELLURIC_SERVICE_URL"),
            outbox_poll_interval: Duration::from_millis(parse_positive(
                &var,
                "CALWATCH_OUTBOX_POLL_MS",
                500u64,
            )?),
            restart_policy,
            shutdown_grace: Duration::from_millis(parse(
                &var,
                "CALWATCH_SHUTDOWN_GRACE_MS",
                30_000u64,
            )?),
            log_format,
        })
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            Error::InvalidConfigValue(format!("{} has an invalid value '{}'", key, raw))
        }),
    }
}

fn parse_positive<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse(var, key, default)?;
    if value <= T::default() {
        return Err(Error::InvalidConfigValue(format!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(value)
}
