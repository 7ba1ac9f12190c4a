//! OAuth2 client-credentials token for cloud logins.

use serde::Deserialize;

use mdquote_core::SessionError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fetch a fresh access token. Called before every (re)connect.
pub async fn fetch_token(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<String, SessionError> {
    let resp = http
        .post(token_url)
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", scope),
        ])
        .send()
        .await
        .map_err(|e| SessionError::Auth(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(SessionError::Auth(format!("HTTP {status}: {body}")));
    }

    let token = resp
        .json::<TokenResponse>()
        .await
        .map_err(|e| SessionError::Auth(e.to_string()))?;
    tracing::debug!(expires_in = token.expires_in, "access token acquired");
    Ok(token.access_token)
}
