//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `SLOTBOOK_BIND` | `0.0.0.0` |
//! | `SLOTBOOK_PORT` | `8080` |
//! | `SLOTBOOK_METRICS_PORT` | unset, exporter disabled |
//! | `DATABASE_URL` | unset, in-memory store |
//! | `SLOTBOOK_DB_MAX_CONNECTIONS` | `10` |
//! | `SLOTBOOK_STAFF_TOKENS` | empty, `token=workspaceId:role,...` |
//! | `SLOTBOOK_WORKSPACES` | empty, `workspaceId:timezone[:auto-confirm],...` |
//! | `SLOTBOOK_BUSINESS_HOURS` | `09:00-17:00` |
//! | `SLOTBOOK_MAX_CONNECTIONS` | `256` |
//! | `SLOTBOOK_SHUTDOWN_TIMEOUT_SECS` | `10` |

use std::time::Duration;

use chrono_tz::Tz;
use ulid::Ulid;

use crate::auth::StaticTokenAuth;
use crate::model::{hhmm, LocalWindow, Workspace};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl std::fmt::Display) -> Self {
        ConfigError::Invalid { var, value: value.to_string(), reason: reason.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub staff_tokens: StaticTokenAuth,
    /// Workspaces to upsert at startup.
    pub workspaces: Vec<Workspace>,
    pub max_connections: usize,
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let business_hours = match get("SLOTBOOK_BUSINESS_HOURS") {
            Some(raw) => parse_window(&raw)
                .ok_or_else(|| ConfigError::invalid("SLOTBOOK_BUSINESS_HOURS", &raw, "expected HH:mm-HH:mm"))?,
            None => default_business_hours(),
        };

        let staff_tokens = match get("SLOTBOOK_STAFF_TOKENS") {
            Some(raw) => StaticTokenAuth::parse(&raw)
                .map_err(|e| ConfigError::invalid("SLOTBOOK_STAFF_TOKENS", "<redacted>", e))?,
            None => StaticTokenAuth::default(),
        };

        let workspaces = match get("SLOTBOOK_WORKSPACES") {
            Some(raw) => parse_workspaces(&raw, business_hours)?,
            None => Vec::new(),
        };

        Ok(Self {
            bind: get("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("SLOTBOOK_PORT", get("SLOTBOOK_PORT"), 8080)?,
            metrics_port: get("SLOTBOOK_METRICS_PORT")
                .map(|raw| parse_var("SLOTBOOK_METRICS_PORT", &raw))
                .transpose()?,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or("SLOTBOOK_DB_MAX_CONNECTIONS", get("SLOTBOOK_DB_MAX_CONNECTIONS"), 10)?,
            staff_tokens,
            workspaces,
            max_connections: parse_or("SLOTBOOK_MAX_CONNECTIONS", get("SLOTBOOK_MAX_CONNECTIONS"), 256)?,
            shutdown_timeout: Duration::from_secs(parse_or(
                "SLOTBOOK_SHUTDOWN_TIMEOUT_SECS",
                get("SLOTBOOK_SHUTDOWN_TIMEOUT_SECS"),
                10,
            )?),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| ConfigError::invalid(var, raw, e))
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |raw| parse_var(var, &raw))
}

pub fn default_business_hours() -> LocalWindow {
    LocalWindow {
        start: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        end: chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
    }
}

fn parse_window(raw: &str) -> Option<LocalWindow> {
    let (start, end) = raw.split_once('-')?;
    let window = LocalWindow { start: hhmm::parse(start)?, end: hhmm::parse(end)? };
    (window.start < window.end).then_some(window)
}

fn parse_workspaces(raw: &str, business_hours: LocalWindow) -> Result<Vec<Workspace>, ConfigError> {
    const VAR: &str = "SLOTBOOK_WORKSPACES";
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| {
            let mut parts = entry.split(':');
            let id = parts.next().unwrap_or_default();
            let id = Ulid::from_string(id).map_err(|e| ConfigError::invalid(VAR, entry, e))?;
            let timezone: Tz = parts
                .next()
                .ok_or_else(|| ConfigError::invalid(VAR, entry, "missing timezone"))?
                .parse()
                .map_err(|e| ConfigError::invalid(VAR, entry, e))?;
            let auto_confirm = match parts.next() {
                None => false,
                Some("auto-confirm") => true,
                Some(other) => return Err(ConfigError::invalid(VAR, entry, format!("unknown flag {other:?}"))),
            };
            Ok(Workspace {
                id,
                name: id.to_string(),
                timezone,
                business_hours,
                auto_confirm,
            })
        })
        .collect()
}
