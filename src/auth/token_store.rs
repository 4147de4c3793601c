//! Token persistence
//!
//! This module defines the [`Token`] value object and the [`TokenStore`]
//! contract used by the lifecycle manager to cache one token per
//! environment, together with its two backends:
//!
//! - [`FileTokenStore`] -- one JSON file per environment under the user cache
//!   directory (`~/.cache/lmi/tokens/<env>.json` on Linux).
//! - [`KeyringTokenStore`] -- the operating system's native credential store
//!   (Keychain on macOS, Secret Service on Linux, Windows Credential Manager
//!   on Windows).
//!
//! Stores never judge expiry. A record that cannot be decoded is logged at
//! warning level and reported as absent.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::TokenStorageKind;
use crate::error::{LmiError, Result};

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// An issued bearer credential.
///
/// Tokens are immutable values: a refresh produces a new `Token` and the old
/// one is replaced wholesale. The serialized form is the on-disk cache record:
///
/// ```json
/// {"access_token":"...","expires_at":1800000000,"token_type":"Bearer",
///  "refresh_token":null,"id_token":null,"issued_at":1799996400}
/// ```
///
/// Timestamps are whole seconds since the Unix epoch.
///
/// # Examples
///
/// ```
/// use lmi::auth::token_store::Token;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let token = Token::issued(
///     "abc".to_string(),
///     None,
///     None,
///     None,
///     Some(3600),
///     now,
/// );
/// assert!(!token.is_expired());
/// assert!(Token::expired_sentinel().is_expired());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Opaque access token presented to the API.
    pub access_token: String,

    /// Authoritative expiry boundary.
    #[serde(default, with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,

    /// Authorization scheme, almost always `"Bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token, when the issuer granted one.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// OpenID Connect ID token, when requested.
    #[serde(default)]
    pub id_token: Option<String>,

    /// Moment the token endpoint issued this token.
    #[serde(default, with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Builds a token from a token endpoint response received at `issued_at`.
    ///
    /// `expires_at` is `issued_at + expires_in`. When the issuer omitted
    /// `expires_in` the token expires at the moment of issuance, so the next
    /// lookup re-verifies it instead of trusting it indefinitely.
    pub fn issued(
        access_token: String,
        token_type: Option<String>,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: Option<u64>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let issued_at = truncate_to_seconds(issued_at);
        let expires_at = match expires_in {
            Some(secs) => i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => issued_at,
        };

        Self {
            access_token,
            expires_at,
            token_type: token_type.unwrap_or_else(default_token_type),
            refresh_token,
            id_token,
            issued_at,
        }
    }

    /// The logout sentinel: empty access token, expired at the epoch.
    pub fn expired_sentinel() -> Self {
        Self {
            access_token: String::new(),
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            token_type: default_token_type(),
            refresh_token: None,
            id_token: None,
            issued_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Returns `true` once the current time has reached `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Returns `true` when `now >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds until expiry, floored at zero.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc`.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "***")
        }

        f.debug_struct("Token")
            .field("access_token", &"***")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("id_token", &redact(&self.id_token))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Persistence contract for one token record per environment.
pub trait TokenStore: Send + Sync {
    /// Returns the stored token, or `None` when nothing decodable is stored.
    ///
    /// Decode and backend failures are logged, never returned.
    fn load(&self, environment: &str) -> Option<Token>;

    /// Overwrites the record for `environment`.
    fn save(&self, environment: &str, token: &Token) -> Result<()>;

    /// Removes the record for `environment`. Removing an absent record is a
    /// no-op.
    fn delete(&self, environment: &str) -> Result<()>;

    /// Makes the stored credential unusable.
    ///
    /// The default writes the expired sentinel; backends without a partial
    /// representation delete the record instead.
    fn invalidate(&self, environment: &str) -> Result<()> {
        self.save(environment, &Token::expired_sentinel())
    }
}

/// Opens the backend selected by configuration.
///
/// # Errors
///
/// Returns [`LmiError::Io`] when the default cache directory cannot be
/// determined for the file backend.
pub fn open_store(kind: TokenStorageKind) -> Result<Arc<dyn TokenStore>> {
    Ok(match kind {
        TokenStorageKind::File => Arc::new(FileTokenStore::default_location()?),
        TokenStorageKind::Keyring => Arc::new(KeyringTokenStore::default()),
    })
}

fn decode(environment: &str, raw: &str) -> Option<Token> {
    match serde_json::from_str::<Token>(raw) {
        Ok(token) => Some(token),
        Err(e) => {
            let err = LmiError::CacheCorruption(e.to_string());
            tracing::warn!("Ignoring cached token for {}: {}", environment, err);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// FileTokenStore
// ---------------------------------------------------------------------------

/// Caches tokens as `<dir>/<environment>.json`.
///
/// The directory is created on first write.
///
/// # Examples
///
/// ```
/// use lmi::auth::token_store::{FileTokenStore, Token, TokenStore};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = FileTokenStore::new(dir.path());
/// assert!(store.load("dev").is_none());
///
/// store.save("dev", &Token::expired_sentinel()).unwrap();
/// assert_eq!(store.load("dev"), Some(Token::expired_sentinel()));
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store under the platform cache directory.
    pub fn default_location() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("", "", "lmi").ok_or_else(|| {
            LmiError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine cache directory",
            ))
        })?;
        Ok(Self::new(proj_dirs.cache_dir().join("tokens")))
    }

    /// Directory holding the token files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`LmiError::Configuration`] if `environment` is not a valid
    /// environment name (see [`validate_environment`]).
    pub fn path_for(&self, environment: &str) -> Result<PathBuf> {
        validate_environment(environment)?;
        Ok(self.dir.join(format!("{environment}.json")))
    }

    #[cfg(unix)]
    fn create_dir(&self) -> std::io::Result<()> {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)?;
        std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
    }

    #[cfg(not(unix))]
    fn create_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }
}

/// Checks that `environment` can be used as a single file name.
///
/// Empty names, `.`, `..`, and names containing a path separator or NUL are
/// rejected so a record never lands outside the store directory.
pub fn validate_environment(environment: &str) -> Result<()> {
    let invalid = environment.is_empty()
        || environment == "."
        || environment == ".."
        || environment.contains(['/', '\\', '\0']);
    if invalid {
        return Err(LmiError::Configuration(format!(
            "invalid environment name: {environment:?}"
        ))
        .into());
    }
    Ok(())
}

/// Writes `contents` to `path`, readable by the owner only on unix.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // mode() only applies on creation; tighten records written earlier.
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.flush()
}

impl TokenStore for FileTokenStore {
    fn load(&self, environment: &str) -> Option<Token> {
        let path = match self.path_for(environment) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Not loading cached token: {}", e);
                return None;
            }
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let token = decode(environment, &raw);
                if token.is_some() {
                    tracing::debug!("Loaded cached token for {}", environment);
                }
                token
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save(&self, environment: &str, token: &Token) -> Result<()> {
        let path = self.path_for(environment)?;
        self.create_dir().map_err(LmiError::Io)?;
        let json = serde_json::to_string(token)?;
        write_private(&path, json.as_bytes()).map_err(LmiError::Io)?;
        tracing::debug!("Saved token to cache for {}", environment);
        Ok(())
    }

    fn delete(&self, environment: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(environment)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LmiError::Io(e).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// KeyringTokenStore
// ---------------------------------------------------------------------------

/// Keyring service used for all lmi tokens.
pub const KEYRING_SERVICE: &str = "lmi-cli-sso";

/// Stores tokens in the OS keyring, one entry per environment.
///
/// The entry's service is [`KEYRING_SERVICE`] (or a custom namespace) and the
/// account is the environment name.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringTokenStore {
    /// Creates a store namespaced under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, environment: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, environment).map_err(|e| LmiError::Keyring(e).into())
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self, environment: &str) -> Option<Token> {
        let entry = match self.entry(environment) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Keyring not available: {}", e);
                return None;
            }
        };

        match entry.get_password() {
            Ok(json) => decode(environment, &json),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                tracing::warn!("Failed to retrieve stored token for {}: {}", environment, e);
                None
            }
        }
    }

    fn save(&self, environment: &str, token: &Token) -> Result<()> {
        let json = serde_json::to_string(token)?;
        self.entry(environment)?
            .set_password(&json)
            .map_err(LmiError::Keyring)?;
        tracing::debug!("Saved token to keyring for {}", environment);
        Ok(())
    }

    fn delete(&self, environment: &str) -> Result<()> {
        match self.entry(environment)?.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(LmiError::Keyring(e).into()),
        }
    }

    fn invalidate(&self, environment: &str) -> Result<()> {
        self.delete(environment)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
