//! lmi - OAuth2 token lifecycle for command-line API clients
//!
//! This library obtains, caches, refreshes, and applies OAuth2 access tokens
//! on behalf of a CLI, one cached credential per named environment.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: Token storage, grant exchanges, PKCE login, lifecycle manager,
//!   and the authenticated HTTP client
//! - `config`: `OAUTH_*` configuration parsing and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: Command handlers for the `lmi` binary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lmi::{AuthenticatedClient, OAuthConfig, SystemBrowser, TokenManager};
//! use lmi::auth::token_store::open_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OAuthConfig::from_env()?;
//!     let store = open_store(config.storage)?;
//!     let manager = TokenManager::with_browser(store, Arc::new(SystemBrowser))?;
//!
//!     let client = AuthenticatedClient::connect(&manager, &config, "default").await?;
//!     let resp = client.get("https://api.example.com/v1/status").await?;
//!     println!("{}", resp.status());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use auth::client::AuthenticatedClient;
pub use auth::flow::{BrowserOpener, LoopbackAuthorizer, SystemBrowser};
pub use auth::grant::GrantClient;
pub use auth::manager::{AuthStatus, TokenManager};
pub use auth::token_store::{FileTokenStore, KeyringTokenStore, Token, TokenStore};
pub use config::{GrantType, OAuthConfig, TokenStorageKind};
pub use error::{LmiError, Result};
