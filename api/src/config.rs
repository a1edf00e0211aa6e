use anyhow::Context;
use std::env;
use std::time::Duration;

/// `DATABASE_URL` value that selects the in-process store.
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub auth_issuer: String,
    pub auth_audience: String,
    pub roles_path: String,
    pub sentry_url: Option<String>,
    /// Security users seen within this window count as active on the dashboard.
    pub active_window: Duration,
    pub listen_addr: String,
}

impl Config {
    pub fn new() -> anyhow::Result<Config> {
        _ = dotenvy::dotenv();

        let active_window_secs = match env::var("ACTIVE_WINDOW_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .context("ACTIVE_WINDOW_SECS must be a number of seconds.")?,
            Err(_) => 300,
        };

        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required.")?,
            auth_issuer: env::var("AUTH_ISSUER").context("AUTH_ISSUER is required.")?,
            auth_audience: env::var("AUTH_AUDIENCE").context("AUTH_AUDIENCE is required.")?,
            roles_path: env::var("ROLES_PATH").unwrap_or_else(|_| "api/roles.toml".to_string()),
            sentry_url: env::var("SENTRY_URL").ok(),
            active_window: Duration::from_secs(active_window_secs),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> &'static Config {
        Box::leak(Box::new(Config {
            database_url: MEMORY_DATABASE.to_string(),
            auth_issuer: "https://issuer.test/".to_string(),
            auth_audience: "custody".to_string(),
            roles_path: "roles.toml".to_string(),
            sentry_url: None,
            active_window: Duration::from_secs(300),
            listen_addr: "127.0.0.1:0".to_string(),
        }))
    }
}
