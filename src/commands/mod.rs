//! Command handlers for the lmi CLI
//!
//! Each handler reads its configuration from `OAUTH_*` environment variables,
//! opens the configured token store, and reports results on stdout.

use std::sync::Arc;

use crate::auth::flow::SystemBrowser;
use crate::auth::manager::TokenManager;
use crate::auth::token_store::open_store;
use crate::config::TokenStorageKind;
use crate::error::Result;

pub mod auth;
pub mod request;

/// Builds a token manager over the store selected by `storage`.
pub(crate) fn token_manager(storage: TokenStorageKind) -> Result<TokenManager> {
    let store = open_store(storage)?;
    TokenManager::with_browser(store, Arc::new(SystemBrowser))
}
