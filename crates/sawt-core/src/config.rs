use std::env::VarError;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::{AppConfig, ClientConfig, Environment};
use crate::ConfigError;

/// Load server configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load server configuration from environment variables already in the process.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Load feed-client configuration, reading `.env` first.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_client_config() -> Result<ClientConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_client_config_from_env()
}

/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_client_config_from_env() -> Result<ClientConfig, ConfigError> {
    build_client_config(|key| std::env::var(key))
}

fn or_default<F>(lookup: &F, var: &str, default: &str) -> String
where
    F: Fn(&str) -> Result<String, VarError>,
{
    lookup(var).unwrap_or_else(|_| default.to_string())
}

fn parse_or_default<T, F>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Result<String, VarError>,
{
    or_default(lookup, var, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

fn parse_positive<F>(lookup: &F, var: &str, default: &str) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let value: u64 = parse_or_default(lookup, var, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let database_url =
        lookup("DATABASE_URL").map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".into()))?;

    let env = parse_environment(&or_default(&lookup, "SAWT_ENV", "development"))?;
    let bind_addr: SocketAddr = parse_or_default(&lookup, "SAWT_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default(&lookup, "SAWT_LOG_LEVEL", "info");

    let db_max_connections = parse_or_default(&lookup, "SAWT_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_or_default(&lookup, "SAWT_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_or_default(&lookup, "SAWT_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let page_size = usize::try_from(parse_positive(&lookup, "SAWT_PAGE_SIZE", "5")?)
        .unwrap_or(usize::MAX);
    let rate_limit_max_requests =
        usize::try_from(parse_positive(&lookup, "SAWT_RATE_LIMIT_MAX_REQUESTS", "60")?)
            .unwrap_or(usize::MAX);
    let rate_limit_window_secs = parse_positive(&lookup, "SAWT_RATE_LIMIT_WINDOW_SECS", "60")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        page_size,
        rate_limit_max_requests,
        rate_limit_window_secs,
    })
}

fn build_client_config<F>(lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let api_base_url = or_default(&lookup, "SAWT_API_BASE_URL", "http://localhost:3000");
    let answer_endpoint = lookup("SAWT_ANSWER_ENDPOINT")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let log_level = or_default(&lookup, "SAWT_LOG_LEVEL", "info");

    let page_size = usize::try_from(parse_positive(&lookup, "SAWT_PAGE_SIZE", "5")?)
        .unwrap_or(usize::MAX);
    let request_timeout_secs = parse_positive(&lookup, "SAWT_REQUEST_TIMEOUT_SECS", "30")?;
    let max_retries = parse_or_default(&lookup, "SAWT_MAX_RETRIES", "3")?;
    let retry_backoff_base_ms = parse_or_default(&lookup, "SAWT_RETRY_BACKOFF_BASE_MS", "500")?;
    let poll_interval_secs = parse_positive(&lookup, "SAWT_POLL_INTERVAL_SECS", "5")?;
    let answer_wait_secs = parse_or_default(&lookup, "SAWT_ANSWER_WAIT_SECS", "10")?;
    let liked_cards_path = PathBuf::from(or_default(
        &lookup,
        "SAWT_LIKED_CARDS_PATH",
        "./.sawt/liked_cards.json",
    ));

    Ok(ClientConfig {
        api_base_url,
        answer_endpoint,
        log_level,
        page_size,
        request_timeout_secs,
        max_retries,
        retry_backoff_base_ms,
        poll_interval_secs,
        answer_wait_secs,
        liked_cards_path,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "SAWT_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}
