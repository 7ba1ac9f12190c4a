//! Service configuration, loaded from YAML.
//!
//! ```yaml
//! market_data:
//!   connection_mode: rtds
//!   service_name: ELEKTRON_DD
//!   hostname: ads1
//!   port: 15000
//!   dacs_username: user1
//!   apply_view: true
//!   view_fids: [22, 25, 3]
//!   batch_request_timeout_ms: 5000
//! server:
//!   bind: 0.0.0.0:8080
//! log:
//!   level: info
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mdquote_ws::{Credentials, ReconnectConfig, WsSessionConfig};

use crate::telemetry::LogConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the feed is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// On-premises distribution server, user-name login.
    #[default]
    Rtds,
    /// Cloud feed, OAuth2 client-credentials login.
    Rto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default)]
    pub connection_mode: ConnectionMode,
    pub service_name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub dacs_username: String,
    /// Explicit WebSocket URL; derived from hostname/port in RTDS mode.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Taken from the environment, never from the file.
    #[serde(skip)]
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: String,
    #[serde(default)]
    pub apply_view: bool,
    #[serde(default)]
    pub view_fids: Vec<i64>,
    #[serde(default = "default_timeout_ms")]
    pub batch_request_timeout_ms: u64,
    #[serde(default = "default_application_id")]
    pub application_id: String,
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_token_url() -> String { "https://api.refinitiv.com/auth/oauth2/v2/token".into() }
fn default_scope() -> String { "trapi.streaming.pricing.read".into() }
fn default_timeout_ms() -> u64 { 5_000 }
fn default_application_id() -> String { "256".into() }
fn default_position() -> String { "127.0.0.1/net".into() }
fn default_reconnect_initial_ms() -> u64 { 500 }
fn default_reconnect_max_ms() -> u64 { 60_000 }

impl MarketDataConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_request_timeout_ms)
    }

    /// Install OAuth2 client credentials (from flags or environment).
    pub fn set_client_credentials(&mut self, id: Option<String>, secret: Option<String>) {
        if let Some(id) = id {
            self.client_id = id;
        }
        if let Some(secret) = secret {
            self.client_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn required(value: &str, what: &str) -> Result<(), ConfigError> {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{what} is required")));
            }
            Ok(())
        }

        required(&self.service_name, "market_data.service_name")?;
        match self.connection_mode {
            ConnectionMode::Rtds => {
                if self.endpoint.is_none() {
                    required(&self.hostname, "market_data.hostname")?;
                    if self.port == 0 {
                        return Err(ConfigError::Invalid(
                            "market_data.port cannot be 0 in rtds mode".into(),
                        ));
                    }
                }
                required(&self.dacs_username, "market_data.dacs_username")?;
            }
            ConnectionMode::Rto => {
                required(self.endpoint.as_deref().unwrap_or_default(), "market_data.endpoint")?;
                required(&self.token_url, "market_data.token_url")?;
                required(&self.client_id, "CLIENT_ID")?;
                required(&self.client_secret, "CLIENT_SECRET")?;
            }
        }
        if self.apply_view && self.view_fids.is_empty() {
            return Err(ConfigError::Invalid(
                "market_data.view_fids must be set when apply_view is true".into(),
            ));
        }
        if self.batch_request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "market_data.batch_request_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(url) => url.clone(),
            None => format!("ws://{}:{}/WebSocket", self.hostname, self.port),
        }
    }

    /// Session settings for the WebSocket adapter.
    pub fn session_config(&self) -> WsSessionConfig {
        let credentials = match self.connection_mode {
            ConnectionMode::Rtds => Credentials::User {
                name: self.dacs_username.clone(),
            },
            ConnectionMode::Rto => Credentials::ClientCredentials {
                token_url: self.token_url.clone(),
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                scope: self.scope.clone(),
            },
        };
        WsSessionConfig {
            endpoint: self.endpoint_url(),
            service_name: self.service_name.clone(),
            credentials,
            view_fids: self.apply_view.then(|| self.view_fids.clone()),
            application_id: self.application_id.clone(),
            position: self.position.clone(),
            reconnect: ReconnectConfig {
                initial_backoff: Duration::from_millis(self.reconnect_initial_ms),
                max_backoff: Duration::from_millis(self.reconnect_max_ms),
                ..ReconnectConfig::default()
            },
            auth_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String { "0.0.0.0:8080".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.market_data.validate()?;
        if self.server.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind is required".into()));
        }
        self.log.check().map_err(ConfigError::Invalid)
    }
}
