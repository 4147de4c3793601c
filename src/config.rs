//! OAuth configuration for lmi
//!
//! The surrounding CLI hands the auth core a flat key→string map (merged from
//! `.env` files, environment variables, and flags elsewhere). This module
//! reads the `OAUTH_*` keys out of that map, validates them against the
//! selected grant type, and produces a typed [`OAuthConfig`].
//!
//! Validation is eager: every problem is reported as
//! [`LmiError::Configuration`] before any network call is attempted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

use crate::error::{LmiError, Result};

/// Grant type selector
pub const KEY_GRANT_TYPE: &str = "OAUTH_GRANT_TYPE";
/// OAuth client identifier
pub const KEY_CLIENT_ID: &str = "OAUTH_CLIENT_ID";
/// OAuth client secret (confidential clients only)
pub const KEY_CLIENT_SECRET: &str = "OAUTH_CLIENT_SECRET";
/// Token endpoint URL
pub const KEY_TOKEN_URL: &str = "OAUTH_TOKEN_URL";
/// Authorization endpoint URL (PKCE only)
pub const KEY_AUTHORIZE_URL: &str = "OAUTH_AUTHORIZE_URL";
/// Resource owner username (password grant)
pub const KEY_USERNAME: &str = "OAUTH_USERNAME";
/// Resource owner password (password grant)
pub const KEY_PASSWORD: &str = "OAUTH_PASSWORD";
/// Space-separated scopes requested during interactive login
pub const KEY_SCOPES: &str = "OAUTH_SCOPES";
/// Token storage backend: `file` or `keyring`
pub const KEY_TOKEN_STORAGE: &str = "OAUTH_TOKEN_STORAGE";

/// Scopes requested when `OAUTH_SCOPES` is not set
pub const DEFAULT_SCOPES: &str = "openid profile email offline_access";

// ---------------------------------------------------------------------------
// GrantType
// ---------------------------------------------------------------------------

/// The OAuth2 grant used to obtain tokens.
///
/// # Examples
///
/// ```
/// use lmi::config::GrantType;
///
/// let grant: GrantType = "authorization_code_pkce".parse().unwrap();
/// assert_eq!(grant, GrantType::AuthorizationCodePkce);
/// assert!(grant.is_interactive());
/// assert!("implicit".parse::<GrantType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Machine-to-machine client credentials
    #[default]
    ClientCredentials,
    /// Resource owner password credentials
    Password,
    /// Exchange of an existing refresh token
    RefreshToken,
    /// Interactive browser login with PKCE
    AuthorizationCodePkce,
}

impl GrantType {
    /// Wire name of the grant, as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Password => "password",
            GrantType::RefreshToken => "refresh_token",
            GrantType::AuthorizationCodePkce => "authorization_code_pkce",
        }
    }

    /// Returns `true` when acquiring a token requires a browser
    pub fn is_interactive(&self) -> bool {
        matches!(self, GrantType::AuthorizationCodePkce)
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = LmiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "password" => Ok(GrantType::Password),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "authorization_code_pkce" => Ok(GrantType::AuthorizationCodePkce),
            other => Err(LmiError::Configuration(format!(
                "Unsupported grant type: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenStorageKind
// ---------------------------------------------------------------------------

/// Backing medium for cached tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenStorageKind {
    /// One JSON file per environment under the user cache directory
    #[default]
    File,
    /// OS credential store (Keychain, Secret Service, Credential Manager)
    Keyring,
}

impl FromStr for TokenStorageKind {
    type Err = LmiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(TokenStorageKind::File),
            "keyring" => Ok(TokenStorageKind::Keyring),
            other => Err(LmiError::Configuration(format!(
                "Unsupported token storage: {other} (expected 'file' or 'keyring')"
            ))),
        }
    }
}

impl TokenStorageKind {
    /// Reads `OAUTH_TOKEN_STORAGE` alone, so commands that only touch the
    /// cache work without a complete grant configuration.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        match lookup(map, KEY_TOKEN_STORAGE) {
            Some(raw) => Ok(raw.parse()?),
            None => Ok(TokenStorageKind::default()),
        }
    }
}

/// Collects every `OAUTH_*` variable from the process environment.
pub fn env_map() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with("OAUTH_"))
        .collect()
}

// ---------------------------------------------------------------------------
// OAuthConfig
// ---------------------------------------------------------------------------

/// Validated OAuth settings for one environment.
///
/// Built once from the externally supplied configuration map and never
/// mutated afterwards.
#[derive(Clone)]
pub struct OAuthConfig {
    /// Grant used to acquire a new token
    pub grant_type: GrantType,
    /// OAuth client identifier
    pub client_id: String,
    /// Client secret; `None` for public (PKCE) clients
    pub client_secret: Option<String>,
    /// Token endpoint
    pub token_url: Url,
    /// Authorization endpoint; always present for the PKCE grant
    pub authorize_url: Option<Url>,
    /// Username for the password grant
    pub username: Option<String>,
    /// Password for the password grant
    pub password: Option<String>,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Where tokens for this environment are cached
    pub storage: TokenStorageKind,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("token_url", &self.token_url.as_str())
            .field("authorize_url", &self.authorize_url.as_ref().map(Url::as_str))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("scopes", &self.scopes)
            .field("storage", &self.storage)
            .finish()
    }
}

impl OAuthConfig {
    /// Reads and validates the `OAUTH_*` keys from a configuration map.
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::Configuration`] when the grant type is unknown or
    /// cannot acquire an initial token, when a key required by the grant is
    /// missing or empty, or when a URL does not parse.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use lmi::config::{GrantType, OAuthConfig};
    ///
    /// let mut map = HashMap::new();
    /// map.insert("OAUTH_CLIENT_ID".to_string(), "cli".to_string());
    /// map.insert("OAUTH_CLIENT_SECRET".to_string(), "s3cret".to_string());
    /// map.insert("OAUTH_TOKEN_URL".to_string(), "https://auth.example.com/token".to_string());
    ///
    /// let config = OAuthConfig::from_map(&map).unwrap();
    /// assert_eq!(config.grant_type, GrantType::ClientCredentials);
    /// assert_eq!(config.scopes.len(), 4);
    /// ```
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let grant_type = match lookup(map, KEY_GRANT_TYPE) {
            Some(raw) => raw.parse::<GrantType>()?,
            None => GrantType::default(),
        };

        if grant_type == GrantType::RefreshToken {
            return Err(LmiError::Configuration(
                "refresh_token cannot be used to acquire an initial token".to_string(),
            )
            .into());
        }

        let client_id = require(map, KEY_CLIENT_ID, grant_type)?;
        let token_url = parse_url(KEY_TOKEN_URL, &require(map, KEY_TOKEN_URL, grant_type)?)?;

        let client_secret = match grant_type {
            GrantType::ClientCredentials | GrantType::Password => {
                Some(require(map, KEY_CLIENT_SECRET, grant_type)?)
            }
            _ => lookup(map, KEY_CLIENT_SECRET).map(str::to_string),
        };

        let (username, password) = if grant_type == GrantType::Password {
            (
                Some(require(map, KEY_USERNAME, grant_type)?),
                Some(require(map, KEY_PASSWORD, grant_type)?),
            )
        } else {
            (None, None)
        };

        let authorize_url = if grant_type == GrantType::AuthorizationCodePkce {
            let raw = require(map, KEY_AUTHORIZE_URL, grant_type)?;
            Some(parse_url(KEY_AUTHORIZE_URL, &raw)?)
        } else {
            None
        };

        let scopes = lookup(map, KEY_SCOPES)
            .unwrap_or(DEFAULT_SCOPES)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let storage = TokenStorageKind::from_map(map)?;

        Ok(Self {
            grant_type,
            client_id,
            client_secret,
            token_url,
            authorize_url,
            username,
            password,
            scopes,
            storage,
        })
    }

    /// Builds the configuration from `OAUTH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_map(&env_map())
    }

    /// Scopes joined into the space-separated wire form
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Returns the non-empty value for `key`, if any.
fn lookup<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
}

fn require(map: &HashMap<String, String>, key: &str, grant: GrantType) -> Result<String> {
    lookup(map, key).map(str::to_string).ok_or_else(|| {
        LmiError::Configuration(format!("{key} is required for the {grant} grant")).into()
    })
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    Url::parse(raw)
        .map_err(|e| LmiError::Configuration(format!("{key} is not a valid URL: {e}")).into())
}
