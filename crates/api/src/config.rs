//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use order_store::DatabaseConfig;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `REQUEST_TIMEOUT_SECS`: per-request deadline unless the client sends
///   `X-Timeout-Duration` (default: `30`)
/// - `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS`,
///   `DB_ACQUIRE_TIMEOUT_SECS`, `DB_IDLE_TIMEOUT_SECS`, `DB_MAX_LIFETIME_SECS`:
///   pool settings, defaults from [`DatabaseConfig`]
/// - `DB_READY_TIMEOUT_SECS`: how long startup waits for the database (default: `30`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub request_timeout: Duration,
    pub database: DatabaseConfig,
    pub db_ready_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(lookup);
        let defaults = Self::default();
        let db = defaults.database;

        Self {
            host: env.get("HOST").unwrap_or(defaults.host),
            port: env.parse("PORT").unwrap_or(defaults.port),
            log_level: env.get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env.parse("LOG_FORMAT").unwrap_or(defaults.log_format),
            request_timeout: env.secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            database: DatabaseConfig {
                url: env.get("DATABASE_URL").unwrap_or(db.url),
                max_connections: env.parse("DB_MAX_CONNECTIONS").unwrap_or(db.max_connections),
                min_connections: env.parse("DB_MIN_CONNECTIONS").unwrap_or(db.min_connections),
                acquire_timeout: env.secs("DB_ACQUIRE_TIMEOUT_SECS", db.acquire_timeout),
                idle_timeout: env.secs("DB_IDLE_TIMEOUT_SECS", db.idle_timeout),
                max_lifetime: env.secs("DB_MAX_LIFETIME_SECS", db.max_lifetime),
            },
            db_ready_timeout: env.secs("DB_READY_TIMEOUT_SECS", defaults.db_ready_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            request_timeout: Duration::from_secs(30),
            database: DatabaseConfig::default(),
            db_ready_timeout: Duration::from_secs(30),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.parse(key).map(Duration::from_secs).unwrap_or(default)
    }
}
