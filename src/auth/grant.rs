//! Token endpoint exchanges
//!
//! [`GrantClient`] turns configuration (and, for refresh, an existing
//! refresh token) into a freshly issued [`Token`] via a single
//! `application/x-www-form-urlencoded` POST to the token endpoint.
//!
//! | Grant                | Form fields                                                  |
//! |----------------------|--------------------------------------------------------------|
//! | `client_credentials` | `grant_type, client_id, client_secret`                       |
//! | `password`           | `grant_type, client_id, client_secret, username, password`   |
//! | `refresh_token`      | `grant_type, client_id, [client_secret], refresh_token`      |
//! | authorization code   | `grant_type, client_id, code, code_verifier, redirect_uri`   |
//!
//! The interactive half of the PKCE grant lives in
//! [`flow`](super::flow); this module only performs its final exchange.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::config::{GrantType, OAuthConfig};
use crate::error::{LmiError, Result};
use crate::auth::token_store::Token;

/// Upper bound on a single token endpoint round-trip.
pub const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Token endpoint response (raw deserialization)
// ---------------------------------------------------------------------------

/// Raw JSON body returned by a token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Accepts `expires_in` as an integer, a float, or a numeric string.
///
/// Anything else (negative, non-finite, or non-numeric) is treated as absent,
/// which makes the token immediately stale.
fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_u64().or_else(|| whole_seconds(n.as_f64())),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| whole_seconds(s.parse::<f64>().ok()))
        }
        Some(_) => None,
    };
    if seconds.is_none() {
        tracing::warn!("Ignoring unusable expires_in in token response");
    }
    Ok(seconds)
}

fn whole_seconds(value: Option<f64>) -> Option<u64> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0 && *v < u64::MAX as f64)
        .map(|v| v as u64)
}

impl TokenResponse {
    fn into_token(self) -> Token {
        Token::issued(
            self.access_token,
            self.token_type,
            self.refresh_token,
            self.id_token,
            self.expires_in,
            Utc::now(),
        )
    }
}

// ---------------------------------------------------------------------------
// GrantClient
// ---------------------------------------------------------------------------

/// Performs token endpoint exchanges for every supported grant.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use lmi::auth::grant::GrantClient;
/// use lmi::config::OAuthConfig;
///
/// # async fn example() -> lmi::error::Result<()> {
/// let mut map = HashMap::new();
/// map.insert("OAUTH_CLIENT_ID".to_string(), "cli".to_string());
/// map.insert("OAUTH_CLIENT_SECRET".to_string(), "s3cret".to_string());
/// map.insert("OAUTH_TOKEN_URL".to_string(), "https://auth.example.com/token".to_string());
/// let config = OAuthConfig::from_map(&map)?;
///
/// let grants = GrantClient::new()?;
/// let token = grants.client_credentials(&config).await?;
/// println!("expires at {}", token.expires_at);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GrantClient {
    http: reqwest::Client,
}

impl GrantClient {
    /// Creates a client whose requests time out after
    /// [`TOKEN_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::Http`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .user_agent(concat!("lmi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(LmiError::Http)?;
        Ok(Self { http })
    }

    /// Acquires a new token using a non-interactive grant.
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::Configuration`] for `refresh_token` (needs an
    /// existing token) and `authorization_code_pkce` (needs the loopback
    /// authorizer), and [`LmiError::Acquisition`] when the endpoint rejects
    /// the exchange.
    pub async fn acquire(&self, config: &OAuthConfig) -> Result<Token> {
        match config.grant_type {
            GrantType::ClientCredentials => self.client_credentials(config).await,
            GrantType::Password => self.password(config).await,
            GrantType::RefreshToken | GrantType::AuthorizationCodePkce => {
                Err(LmiError::Configuration(format!(
                    "the {} grant cannot be acquired without user or token input",
                    config.grant_type
                ))
                .into())
            }
        }
    }

    /// `client_credentials` exchange.
    pub async fn client_credentials(&self, config: &OAuthConfig) -> Result<Token> {
        let secret = required(config.client_secret.as_deref(), "OAUTH_CLIENT_SECRET")?;
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", secret),
        ];
        self.exchange(&config.token_url, GrantType::ClientCredentials, &params)
            .await
    }

    /// Resource owner `password` exchange.
    pub async fn password(&self, config: &OAuthConfig) -> Result<Token> {
        let secret = required(config.client_secret.as_deref(), "OAUTH_CLIENT_SECRET")?;
        let username = required(config.username.as_deref(), "OAUTH_USERNAME")?;
        let password = required(config.password.as_deref(), "OAUTH_PASSWORD")?;
        let params = [
            ("grant_type", "password"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", secret),
            ("username", username),
            ("password", password),
        ];
        self.exchange(&config.token_url, GrantType::Password, &params)
            .await
    }

    /// Exchanges `current.refresh_token` for a new token.
    ///
    /// When the response omits `refresh_token` or `id_token`, the values from
    /// `current` are carried over. Public clients send no `client_secret`.
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::AuthenticationFailure`] when `current` carries no
    /// refresh token.
    pub async fn refresh(&self, config: &OAuthConfig, current: &Token) -> Result<Token> {
        let refresh_token = current.refresh_token.as_deref().ok_or_else(|| {
            LmiError::AuthenticationFailure("no refresh token available".to_string())
        })?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let mut token = self
            .exchange(&config.token_url, GrantType::RefreshToken, &params)
            .await?;
        if token.refresh_token.is_none() {
            token.refresh_token = current.refresh_token.clone();
        }
        if token.id_token.is_none() {
            token.id_token = current.id_token.clone();
        }
        Ok(token)
    }

    /// Final step of the PKCE grant: trades an authorization code and its
    /// verifier for a token. The client is public, so no secret is sent.
    pub async fn authorization_code(
        &self,
        config: &OAuthConfig,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<Token> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", config.client_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        self.exchange(&config.token_url, GrantType::AuthorizationCodePkce, &params)
            .await
    }

    async fn exchange(
        &self,
        token_url: &Url,
        grant: GrantType,
        params: &[(&str, &str)],
    ) -> Result<Token> {
        tracing::info!("Requesting token from {} using {}", token_url, grant);

        let resp = self
            .http
            .post(token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(LmiError::Http)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            tracing::warn!("Token endpoint rejected {} grant with {}", grant, status);
            return Err(LmiError::Acquisition {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let raw: TokenResponse = resp.json().await.map_err(LmiError::Http)?;
        Ok(raw.into_token())
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    value.ok_or_else(|| LmiError::Configuration(format!("{key} is required")).into())
}
