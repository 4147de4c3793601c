//! HTTP client that attaches a bearer token and recovers from one `401`
//!
//! [`AuthenticatedClient`] sends every request with the current token in the
//! `Authorization` header. When a response is `401 Unauthorized`:
//!
//! - with a refresh token: refresh, persist, and retry the request once;
//! - without one, or when the refresh fails: report
//!   [`LmiError::AuthenticationFailure`].
//!
//! A failed refresh also invalidates the stored credential so the next run
//! starts from a fresh login.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use crate::auth::grant::GrantClient;
use crate::auth::manager::TokenManager;
use crate::auth::token_store::{Token, TokenStore};
use crate::config::OAuthConfig;
use crate::error::{LmiError, Result};

/// Timeout applied to API requests.
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bearer-authenticated HTTP client for one environment.
///
/// The current token is shared behind an async mutex so concurrent requests
/// that hit `401` together perform a single refresh.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use lmi::auth::client::AuthenticatedClient;
/// use lmi::auth::flow::SystemBrowser;
/// use lmi::auth::manager::TokenManager;
/// use lmi::auth::token_store::FileTokenStore;
/// use lmi::config::OAuthConfig;
///
/// # async fn example() -> lmi::error::Result<()> {
/// let config = OAuthConfig::from_map(&HashMap::new())?;
/// let store = Arc::new(FileTokenStore::default_location()?);
/// let manager = TokenManager::with_browser(store, Arc::new(SystemBrowser))?;
///
/// let client = AuthenticatedClient::connect(&manager, &config, "dev").await?;
/// let resp = client.get("https://api.example.com/v1/models").await?;
/// println!("{}", resp.status());
/// # Ok(())
/// # }
/// ```
pub struct AuthenticatedClient {
    http: reqwest::Client,
    token: Mutex<Token>,
    config: OAuthConfig,
    environment: String,
    store: Arc<dyn TokenStore>,
    grants: GrantClient,
}

impl AuthenticatedClient {
    /// Creates a client around an already obtained token.
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::Http`] if the HTTP client cannot be built.
    pub fn new(
        token: Token,
        config: OAuthConfig,
        environment: impl Into<String>,
        store: Arc<dyn TokenStore>,
        grants: GrantClient,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_REQUEST_TIMEOUT)
            .user_agent(concat!("lmi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(LmiError::Http)?;
        Ok(Self {
            http,
            token: Mutex::new(token),
            config,
            environment: environment.into(),
            store,
            grants,
        })
    }

    /// Obtains a token through `manager` without interaction and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::AuthenticationFailure`] if no token is available.
    pub async fn connect(
        manager: &TokenManager,
        config: &OAuthConfig,
        environment: &str,
    ) -> Result<Self> {
        let token = manager
            .get_token(config, environment, false, false)
            .await
            .ok_or_else(|| {
                LmiError::AuthenticationFailure(format!(
                    "no valid token for '{environment}'; run `lmi auth login -e {environment}`"
                ))
            })?;
        Self::new(
            token,
            config.clone(),
            environment,
            Arc::clone(manager.store()),
            manager.grants().clone(),
        )
    }

    /// Snapshot of the token currently in use.
    pub async fn token(&self) -> Token {
        self.token.lock().await.clone()
    }

    /// Sends a request with no body.
    pub async fn request(&self, method: Method, url: &str) -> Result<Response> {
        self.request_with(method, url, |builder| builder).await
    }

    /// `GET url`
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(Method::GET, url).await
    }

    /// `DELETE url`
    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.request(Method::DELETE, url).await
    }

    /// `POST url` with a JSON body.
    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        self.request_with(Method::POST, url, |builder| builder.json(body))
            .await
    }

    /// `PUT url` with a JSON body.
    pub async fn put_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        self.request_with(Method::PUT, url, |builder| builder.json(body))
            .await
    }

    /// Sends `method url`, letting `build` add headers or a body.
    ///
    /// `build` may run twice: once for the original attempt and once for the
    /// retry after a refresh.
    ///
    /// # Errors
    ///
    /// - [`LmiError::Url`] if `url` is not absolute.
    /// - [`LmiError::Http`] on transport failure.
    /// - [`LmiError::AuthenticationFailure`] if the server answers `401` and
    ///   the token cannot be refreshed, or answers `401` again after a
    ///   refresh.
    pub async fn request_with<F>(&self, method: Method, url: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = Url::parse(url).map_err(LmiError::Url)?;

        let sent_with = self.token().await;
        let resp = self.send(&method, &url, &sent_with, &build).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::info!("{} {} returned 401, refreshing token", method, url);
        let retry_token = self.refresh_after_401(&sent_with).await?;

        let retry = self.send(&method, &url, &retry_token, &build).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(LmiError::AuthenticationFailure(format!(
                "{method} {url} returned 401 after token refresh"
            ))
            .into());
        }
        Ok(retry)
    }

    async fn send<F>(
        &self,
        method: &Method,
        url: &Url,
        token: &Token,
        build: &F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let builder = self
            .http
            .request(method.clone(), url.clone())
            .header(reqwest::header::AUTHORIZATION, token.authorization_header());
        let resp = build(builder).send().await.map_err(LmiError::Http)?;
        tracing::debug!("{} {} -> {}", method, url, resp.status());
        Ok(resp)
    }

    /// Replaces `rejected` with a refreshed token, unless another request
    /// already did.
    async fn refresh_after_401(&self, rejected: &Token) -> Result<Token> {
        let mut current = self.token.lock().await;
        if current.access_token != rejected.access_token {
            return Ok(current.clone());
        }

        if current.refresh_token.is_none() {
            return Err(LmiError::AuthenticationFailure(format!(
                "access token for '{}' was rejected and no refresh token is available",
                self.environment
            ))
            .into());
        }

        let refreshed = match self.grants.refresh(&self.config, &current).await {
            Ok(token) => token,
            Err(e) => {
                if let Err(invalidate_err) = self.store.invalidate(&self.environment) {
                    tracing::warn!(
                        "Failed to invalidate cached token for {}: {}",
                        self.environment,
                        invalidate_err
                    );
                }
                return Err(LmiError::AuthenticationFailure(format!(
                    "token refresh for '{}' failed: {e}",
                    self.environment
                ))
                .into());
            }
        };

        if let Err(e) = self.store.save(&self.environment, &refreshed) {
            tracing::warn!("Failed to cache refreshed token for {}: {}", self.environment, e);
        }
        *current = refreshed.clone();
        Ok(refreshed)
    }
}
