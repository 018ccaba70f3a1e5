use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of service windows seeded at startup.
    pub window_count: i32,
    /// Tickets a window may serve at once. 1 keeps the historical
    /// one-at-a-time behavior; later deployments ran 3-5.
    pub window_capacity: i64,
    /// Counter allocation retries before giving up on ticket creation.
    pub counter_max_retries: u32,
    /// Registration rate limit: attempts per client within the window.
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    /// Minutes to add to Utc to get the registrar's wall clock.
    pub timezone_offset_minutes: i32,
}

impl QueueConfig {
    /// A zero or negative window count or capacity would make every
    /// call-next come back empty with nothing in the logs to say why, so
    /// misconfiguration is rejected at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.window_count > 0,
            "QUEUE_WINDOW_COUNT must be positive, got {}",
            self.window_count
        );
        anyhow::ensure!(
            self.window_capacity > 0,
            "QUEUE_WINDOW_CAPACITY must be positive, got {}",
            self.window_capacity
        );
        Ok(())
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenv().ok();

        let config = Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parse_or("SERVER_PORT", 8080)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
                max_connections: env_parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            queue: QueueConfig {
                window_count: env_parse_or("QUEUE_WINDOW_COUNT", 4)?,
                window_capacity: env_parse_or("QUEUE_WINDOW_CAPACITY", 1)?,
                counter_max_retries: env_parse_or("QUEUE_COUNTER_MAX_RETRIES", 3)?,
                rate_limit_max: env_parse_or("QUEUE_RATE_LIMIT_MAX", 10)?,
                rate_limit_window_secs: env_parse_or("QUEUE_RATE_LIMIT_WINDOW_SECS", 60)?,
                timezone_offset_minutes: env_parse_or("QUEUE_TIMEZONE_OFFSET_MINUTES", 0)?,
            },
        };
        config.queue.validate()?;
        Ok(config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
