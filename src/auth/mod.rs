//! OAuth 2.0 token lifecycle
//!
//! # Module Layout
//!
//! - [`client`]      -- HTTP client that attaches the bearer token and
//!   retries once after a refresh on `401`
//! - [`flow`]        -- Interactive authorization code flow with PKCE over a
//!   loopback redirect
//! - [`grant`]       -- Token endpoint exchanges for every supported grant
//! - [`manager`]     -- Reuse / refresh / acquire decisions per environment
//! - [`pkce`]        -- PKCE `S256` challenge and `state` generation
//! - [`token_store`] -- Token persistence in files or the OS keyring

pub mod client;
pub mod flow;
pub mod grant;
pub mod manager;
pub mod pkce;
pub mod token_store;
