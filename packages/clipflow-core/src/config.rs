//! Process configuration.
//!
//! Everything comes from the environment; the server binary layers clap
//! overrides on top. Validation happens once at startup so misconfiguration
//! fails fast with an operator-readable message.

use std::path::PathBuf;

use thiserror::Error;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default SQLite database path.
pub const DEFAULT_DATABASE_PATH: &str = "data/clips.db";

/// Default EventSub WebSocket URL.
pub const DEFAULT_EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Configuration errors, with the offending variable named.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        reason: String,
    },
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream application client id (30 lowercase alphanumerics).
    pub client_id: String,
    pub client_secret: String,
    /// Bot access token minted by the setup tool.
    pub bot_access_token: String,
    pub bot_refresh_token: Option<String>,
    /// Channel whose chat feeds the queue (lowercase login).
    pub channel: String,
    /// Cookie-signing secret, at least 48 bytes.
    pub session_secret: String,
    /// Helix API base URL.
    pub api_url: String,
    /// EventSub WebSocket URL.
    pub eventsub_ws_url: String,
    /// Exact allowed browser origin in production.
    pub frontend_url: Option<String>,
    pub port: u16,
    pub database_path: PathBuf,
    /// Directory for persisted runtime state (refreshed tokens).
    pub data_dir: PathBuf,
    pub production: bool,
}

impl Config {
    /// Loads and validates configuration from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            client_id: require("CLIPFLOW_CLIENT_ID")?,
            client_secret: require("CLIPFLOW_CLIENT_SECRET")?,
            bot_access_token: require("CLIPFLOW_BOT_ACCESS_TOKEN")?,
            bot_refresh_token: optional("CLIPFLOW_BOT_REFRESH_TOKEN"),
            channel: require("CLIPFLOW_CHANNEL")?,
            session_secret: require("CLIPFLOW_SESSION_SECRET")?,
            api_url: optional("CLIPFLOW_API_URL")
                .unwrap_or_else(|| "https://api.twitch.tv/helix".into()),
            eventsub_ws_url: optional("CLIPFLOW_EVENTSUB_WS_URL")
                .unwrap_or_else(|| DEFAULT_EVENTSUB_WS_URL.into()),
            frontend_url: optional("CLIPFLOW_FRONTEND_URL"),
            port: match optional("CLIPFLOW_PORT") {
                Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                    variable: "CLIPFLOW_PORT",
                    reason: format!("not a port number: {raw}"),
                })?,
                None => DEFAULT_PORT,
            },
            database_path: optional("CLIPFLOW_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            data_dir: optional("CLIPFLOW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            production: optional("CLIPFLOW_ENV").as_deref() == Some("production"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates field formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.len() != 30
            || !self
                .client_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ConfigError::Invalid {
                variable: "CLIPFLOW_CLIENT_ID",
                reason: "must be 30 lowercase alphanumeric characters".into(),
            });
        }
        if self.channel.is_empty() || self.channel.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid {
                variable: "CLIPFLOW_CHANNEL",
                reason: "must be the lowercase channel login".into(),
            });
        }
        if self.session_secret.len() < 48 {
            return Err(ConfigError::Invalid {
                variable: "CLIPFLOW_SESSION_SECRET",
                reason: "must be at least 48 bytes of random data".into(),
            });
        }
        if self.bot_access_token.is_empty() {
            return Err(ConfigError::Invalid {
                variable: "CLIPFLOW_BOT_ACCESS_TOKEN",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            client_id: "abcdefghij0123456789abcdefghij".into(),
            client_secret: "secret".into(),
            bot_access_token: "token".into(),
            bot_refresh_token: None,
            channel: "somechannel".into(),
            session_secret: "s".repeat(48),
            api_url: "https://api.twitch.tv/helix".into(),
            eventsub_ws_url: DEFAULT_EVENTSUB_WS_URL.into(),
            frontend_url: None,
            port: DEFAULT_PORT,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            data_dir: PathBuf::from("data"),
            production: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn client_id_must_be_30_lowercase_alphanumerics() {
        let mut config = valid_config();
        config.client_id = "short".into();
        assert!(config.validate().is_err());

        config.client_id = "ABCDEFGHIJ0123456789ABCDEFGHIJ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn channel_must_be_lowercase() {
        let mut config = valid_config();
        config.channel = "SomeChannel".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_secret_must_be_48_bytes() {
        let mut config = valid_config();
        config.session_secret = "short".into();
        assert!(config.validate().is_err());
    }
}
