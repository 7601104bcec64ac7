use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::poll::DEFAULT_POLL_INTERVAL;

pub const DEFAULT_SERVER: &str = "ws://127.0.0.1:9001";
pub const DEFAULT_DB_PATH: &str = "kaiwa-server.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KAIWA_SERVER is not a valid websocket url: {0}")]
    BadServerUrl(#[from] url::ParseError),
    #[error("KAIWA_POLL_MS must be a positive number of milliseconds: {0}")]
    BadPollInterval(String),
}

/// Client settings, env-driven with defaults. `KAIWA_SERVER` points at the
/// store, `KAIWA_POLL_MS` overrides the refresh cadence.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: Url,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = env::var("KAIWA_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string());
        let server = Url::parse(&server)?;
        let poll_interval = match env::var("KAIWA_POLL_MS") {
            Ok(raw) => {
                let millis = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|millis| *millis > 0)
                    .ok_or(ConfigError::BadPollInterval(raw))?;
                Duration::from_millis(millis)
            }
            Err(_) => DEFAULT_POLL_INTERVAL,
        };
        Ok(Config {
            server,
            poll_interval,
        })
    }
}

/// Where the reference server keeps its database (`KAIWA_DB` overrides).
pub fn server_db_path() -> String {
    env::var("KAIWA_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/// Address the reference server listens on (`KAIWA_LISTEN` overrides).
pub fn server_listen_addr() -> String {
    env::var("KAIWA_LISTEN").unwrap_or_else(|_| "127.0.0.1:9001".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the env mutations cannot race each other.
    #[test]
    fn poll_interval_env_is_validated() {
        env::remove_var("KAIWA_POLL_MS");
        assert_eq!(
            Config::from_env().unwrap().poll_interval,
            DEFAULT_POLL_INTERVAL
        );

        env::set_var("KAIWA_POLL_MS", "500");
        assert_eq!(
            Config::from_env().unwrap().poll_interval,
            Duration::from_millis(500)
        );

        env::set_var("KAIWA_POLL_MS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::BadPollInterval(_))
        ));

        env::set_var("KAIWA_POLL_MS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::BadPollInterval(_))
        ));

        env::remove_var("KAIWA_POLL_MS");
    }
}
