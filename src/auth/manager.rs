//! Token lifecycle coordination
//!
//! [`TokenManager`] is the single entry point for obtaining a usable access
//! token for an environment. It combines a [`TokenStore`], the
//! non-interactive [`GrantClient`], and the interactive
//! [`LoopbackAuthorizer`]:
//!
//! 1. Unless `force_new` is set, return a cached token that has not expired.
//! 2. If the cached token expired but carries a refresh token, refresh it.
//! 3. Otherwise acquire a new token with the configured grant. The PKCE
//!    grant only runs when interaction is allowed.
//!
//! Every token obtained over the network is written back to the store before
//! it is returned. Failures are logged and reported as `None`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::flow::{BrowserOpener, LoopbackAuthorizer};
use crate::auth::grant::GrantClient;
use crate::auth::token_store::{Token, TokenStore};
use crate::config::{GrantType, OAuthConfig};
use crate::error::Result;

// ---------------------------------------------------------------------------
// AuthStatus
// ---------------------------------------------------------------------------

/// Snapshot of the cached credential for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    /// Environment the snapshot describes
    pub environment: String,
    /// `true` when a non-expired access token is cached
    pub logged_in: bool,
    /// Grant type from configuration
    pub grant_type: GrantType,
    /// Expiry of the cached token, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds until expiry, floored at zero
    pub expires_in: Option<i64>,
    /// Whether a refresh token is cached
    pub has_refresh_token: bool,
    /// Whether an ID token is cached
    pub has_id_token: bool,
}

// ---------------------------------------------------------------------------
// TokenManager
// ---------------------------------------------------------------------------

/// Decides whether to reuse, refresh, or acquire a token.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::sync::Arc;
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
/// if let Some(token) = manager.get_token(&config, "dev", true, false).await {
///     println!("{}", token.authorization_header());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    grants: GrantClient,
    authorizer: LoopbackAuthorizer,
}

impl TokenManager {
    /// Assembles a manager from its parts.
    pub fn new(
        store: Arc<dyn TokenStore>,
        grants: GrantClient,
        authorizer: LoopbackAuthorizer,
    ) -> Self {
        Self {
            store,
            grants,
            authorizer,
        }
    }

    /// Creates a manager with a default [`GrantClient`] and a loopback
    /// authorizer that opens URLs with `browser`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_browser(
        store: Arc<dyn TokenStore>,
        browser: Arc<dyn BrowserOpener>,
    ) -> Result<Self> {
        let grants = GrantClient::new()?;
        let authorizer = LoopbackAuthorizer::new(grants.clone(), browser);
        Ok(Self::new(store, grants, authorizer))
    }

    /// Backing token store.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Client used for token endpoint exchanges.
    pub fn grants(&self) -> &GrantClient {
        &self.grants
    }

    /// Returns a usable token for `environment`, or `None` if none could be
    /// obtained.
    ///
    /// With `force_new` the cache is skipped and a new token is always
    /// acquired. The PKCE grant is only attempted when `allow_interactive`
    /// is `true`.
    pub async fn get_token(
        &self,
        config: &OAuthConfig,
        environment: &str,
        allow_interactive: bool,
        force_new: bool,
    ) -> Option<Token> {
        if !force_new {
            if let Some(cached) = self.store.load(environment) {
                if !cached.is_expired() {
                    tracing::debug!("Using cached token for {}", environment);
                    return Some(cached);
                }

                if cached.refresh_token.is_some() {
                    match self.grants.refresh(config, &cached).await {
                        Ok(token) => {
                            tracing::info!("Refreshed token for {}", environment);
                            self.persist(environment, &token);
                            return Some(token);
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Token refresh failed for {}, acquiring a new token: {}",
                                environment,
                                e
                            );
                        }
                    }
                }
            }
        }

        if config.grant_type.is_interactive() && !allow_interactive {
            tracing::warn!(
                "No valid token for {} and interactive login is disabled; run `lmi auth login`",
                environment
            );
            return None;
        }

        let acquired = match config.grant_type {
            GrantType::AuthorizationCodePkce => self.authorizer.authorize(config).await,
            _ => self.grants.acquire(config).await,
        };

        match acquired {
            Ok(token) => {
                tracing::info!(
                    "Acquired token for {} using {}",
                    environment,
                    config.grant_type
                );
                self.persist(environment, &token);
                Some(token)
            }
            Err(e) => {
                tracing::error!("Failed to acquire token for {}: {}", environment, e);
                None
            }
        }
    }

    /// Makes the cached credential for `environment` unusable.
    pub fn logout(&self, environment: &str) -> Result<()> {
        self.store.invalidate(environment)?;
        tracing::info!("Logged out of {}", environment);
        Ok(())
    }

    /// Describes the cached credential without touching the network.
    pub fn status(&self, config: &OAuthConfig, environment: &str) -> AuthStatus {
        let cached = self
            .store
            .load(environment)
            .filter(|t| !t.access_token.is_empty());

        match cached {
            Some(token) => AuthStatus {
                environment: environment.to_string(),
                logged_in: !token.is_expired(),
                grant_type: config.grant_type,
                expires_at: Some(token.expires_at),
                expires_in: Some(token.expires_in()),
                has_refresh_token: token.refresh_token.is_some(),
                has_id_token: token.id_token.is_some(),
            },
            None => AuthStatus {
                environment: environment.to_string(),
                logged_in: false,
                grant_type: config.grant_type,
                expires_at: None,
                expires_in: None,
                has_refresh_token: false,
                has_id_token: false,
            },
        }
    }

    fn persist(&self, environment: &str, token: &Token) {
        if let Err(e) = self.store.save(environment, token) {
            tracing::warn!("Failed to cache token for {}: {}", environment, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::FileTokenStore;
    use crate::config::{KEY_CLIENT_ID, KEY_CLIENT_SECRET, KEY_TOKEN_URL};
    use std::collections::HashMap;

    struct NoBrowser;

    impl BrowserOpener for NoBrowser {
        fn open(&self, _url: &str) -> Result<()> {
            panic!("browser must not be opened");
        }
    }

    fn config() -> OAuthConfig {
        let mut map = HashMap::new();
        map.insert(KEY_CLIENT_ID.to_string(), "cli".to_string());
        map.insert(KEY_CLIENT_SECRET.to_string(), "s".to_string());
        // Nothing listens here; any network attempt fails fast.
        map.insert(KEY_TOKEN_URL.to_string(), "http://127.0.0.1:9/token".to_string());
        OAuthConfig::from_map(&map).unwrap()
    }

    fn manager(dir: &std::path::Path) -> TokenManager {
        TokenManager::with_browser(Arc::new(FileTokenStore::new(dir)), Arc::new(NoBrowser))
            .unwrap()
    }

    fn fresh_token() -> Token {
        Token::issued(
            "cached".to_string(),
            None,
            Some("r".to_string()),
            None,
            Some(3600),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_get_token_returns_unexpired_cache_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.store().save("dev", &fresh_token()).unwrap();

        let token = manager.get_token(&config(), "dev", false, false).await;
        assert_eq!(token.unwrap().access_token, "cached");
    }

    #[tokio::test]
    async fn test_get_token_returns_none_when_acquisition_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        assert!(manager.get_token(&config(), "dev", false, false).await.is_none());
        assert!(manager.store().load("dev").is_none());
    }

    #[test]
    fn test_logout_leaves_expired_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.store().save("dev", &fresh_token()).unwrap();

        manager.logout("dev").unwrap();

        let stored = manager.store().load("dev").unwrap();
        assert_eq!(stored, Token::expired_sentinel());
        assert!(!manager.status(&config(), "dev").logged_in);
    }

    #[test]
    fn test_status_reports_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.store().save("dev", &fresh_token()).unwrap();

        let status = manager.status(&config(), "dev");
        assert!(status.logged_in);
        assert_eq!(status.grant_type, GrantType::ClientCredentials);
        assert!(status.expires_in.unwrap() > 3500);
        assert!(status.has_refresh_token);
        assert!(!status.has_id_token);
    }

    #[test]
    fn test_status_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let status = manager(dir.path()).status(&config(), "prod");
        assert_eq!(status.environment, "prod");
        assert!(!status.logged_in);
        assert!(status.expires_at.is_none());
    }
}
