//! Session configuration.

use std::time::Duration;

use mdquote_core::SessionError;

use crate::reconnect::ReconnectConfig;

/// How the session authenticates its login.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Direct login to an on-premises server with a DACS user name.
    User { name: String },
    /// OAuth2 client-credentials grant; the access token is sent in the login.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
    },
}

/// Configuration for [`WsSession`](crate::client::WsSession).
#[derive(Debug, Clone)]
pub struct WsSessionConfig {
    /// WebSocket endpoint, e.g. `ws://ads1:15000/WebSocket`.
    pub endpoint: String,
    /// Service every item request is addressed to.
    pub service_name: String,
    pub credentials: Credentials,
    /// Field ids to restrict responses to; `None` requests every field.
    pub view_fids: Option<Vec<i64>>,
    pub application_id: String,
    pub position: String,
    pub reconnect: ReconnectConfig,
    /// Timeout for the OAuth2 token request.
    pub auth_timeout: Duration,
}

impl WsSessionConfig {
    /// Config for a direct (user-name) login with default tuning.
    pub fn direct(
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            credentials: Credentials::User { name: user.into() },
            view_fids: None,
            application_id: "256".into(),
            position: "127.0.0.1/net".into(),
            reconnect: ReconnectConfig::default(),
            auth_timeout: Duration::from_secs(15),
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.endpoint.trim().is_empty() {
            return Err(SessionError::Config("endpoint is blank".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(SessionError::Config("service name is blank".into()));
        }
        match &self.credentials {
            Credentials::User { name } if name.trim().is_empty() => {
                Err(SessionError::Config("login user name is blank".into()))
            }
            Credentials::ClientCredentials { token_url, client_id, client_secret, .. }
                if token_url.trim().is_empty()
                    || client_id.trim().is_empty()
                    || client_secret.trim().is_empty() =>
            {
                Err(SessionError::Config("client credentials are incomplete".into()))
            }
            _ => match &self.view_fids {
                Some(fids) if fids.is_empty() => {
                    Err(SessionError::Config("view requested without field ids".into()))
                }
                _ => Ok(()),
            },
        }
    }
}
