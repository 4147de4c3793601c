//! Error types for lmi
//!
//! This module defines the error taxonomy used by the token lifecycle
//! manager, the loopback authorizer, and the authenticated HTTP client,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for lmi operations
///
/// Variants mirror the points at which credential handling can fail:
/// configuration validation, the token endpoint exchange, the interactive
/// PKCE login, and API calls rejected after recovery was attempted.
#[derive(Error, Debug)]
pub enum LmiError {
    /// Missing or invalid configuration keys
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The token endpoint rejected the exchange
    #[error("Token endpoint returned {status}: {body}")]
    Acquisition {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Raw response body, kept for diagnosis
        body: String,
    },

    /// No browser callback arrived before the login deadline
    #[error("Login timed out waiting for the browser callback")]
    LoginTimeout,

    /// The `state` returned by the authorization server did not match
    #[error("State mismatch in OAuth callback")]
    CallbackStateMismatch,

    /// The authorization server redirected back with an `error` parameter
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The callback request could not be interpreted
    #[error("Invalid OAuth callback: {0}")]
    InvalidCallback(String),

    /// An API call stayed unauthenticated after the single recovery attempt
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// A cached token record could not be decoded
    #[error("Token cache corrupted: {0}")]
    CacheCorruption(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for lmi operations
///
/// Uses `anyhow::Error` so that context can be attached while propagating;
/// callers that need to branch on the failure kind downcast to [`LmiError`].
pub type Result<T> = anyhow::Result<T>;
