//! Token lifecycle integration tests
//!
//! Exercises `TokenManager::get_token` decisions (reuse, refresh, acquire,
//! interactive gating) against a wiremock token endpoint and a temporary
//! file store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lmi::auth::token_store::{Token, TokenStore};

mod common;

use common::{
    client_credentials_config, manager_with, pkce_config, temp_store, token_body, CallbackReply,
    CountingBrowser, RedirectingBrowser,
};

fn expired_with_refresh(refresh: &str) -> Token {
    Token::issued(
        "stale_access".to_string(),
        None,
        Some(refresh.to_string()),
        Some("id_old".to_string()),
        Some(60),
        Utc::now() - Duration::hours(2),
    )
}

async fn mount_client_credentials(server: &MockServer, access: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access, None)))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_second_call_reuses_cached_token() {
    let server = MockServer::start().await;
    mount_client_credentials(&server, "cc_access", 1).await;

    let (store, _tmp) = temp_store();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    let first = manager.get_token(&config, "dev", false, false).await.unwrap();
    let second = manager.get_token(&config, "dev", false, false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.load("dev"), Some(first));

    server.verify().await;
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("refreshed", None)))
        .expect(1)
        .mount(&server)
        .await;
    mount_client_credentials(&server, "unused", 0).await;

    let (store, _tmp) = temp_store();
    store.save("dev", &expired_with_refresh("r1")).unwrap();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    let token = manager.get_token(&config, "dev", false, false).await.unwrap();
    assert_eq!(token.access_token, "refreshed");
    assert_eq!(token.refresh_token.as_deref(), Some("r1"));
    assert_eq!(token.id_token.as_deref(), Some("id_old"));

    // Cached after refresh: no further network calls.
    let again = manager.get_token(&config, "dev", false, false).await.unwrap();
    assert_eq!(again, token);

    server.verify().await;
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_acquisition() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&server)
        .await;
    mount_client_credentials(&server, "fresh", 1).await;

    let (store, _tmp) = temp_store();
    store.save("dev", &expired_with_refresh("revoked")).unwrap();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    let token = manager.get_token(&config, "dev", false, false).await.unwrap();
    assert_eq!(token.access_token, "fresh");
    assert_eq!(store.load("dev").unwrap().access_token, "fresh");

    server.verify().await;
}

#[tokio::test]
async fn test_force_new_skips_valid_cache() {
    let server = MockServer::start().await;
    mount_client_credentials(&server, "forced", 1).await;

    let (store, _tmp) = temp_store();
    let cached = Token::issued(
        "cached".to_string(),
        None,
        None,
        None,
        Some(3600),
        Utc::now(),
    );
    store.save("dev", &cached).unwrap();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    let token = manager.get_token(&config, "dev", false, true).await.unwrap();
    assert_eq!(token.access_token, "forced");

    server.verify().await;
}

#[tokio::test]
async fn test_corrupt_cache_is_treated_as_absent() {
    let server = MockServer::start().await;
    mount_client_credentials(&server, "after_corruption", 1).await;

    let (store, _tmp) = temp_store();
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.path_for("dev").unwrap(), "{not json").unwrap();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    let token = manager.get_token(&config, "dev", false, false).await.unwrap();
    assert_eq!(token.access_token, "after_corruption");
    assert_eq!(store.load("dev"), Some(token));

    server.verify().await;
}

#[tokio::test]
async fn test_acquisition_failure_returns_none_and_keeps_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .expect(1)
        .mount(&server)
        .await;

    let (store, _tmp) = temp_store();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    assert!(manager.get_token(&config, "dev", false, false).await.is_none());
    assert!(store.load("dev").is_none());

    server.verify().await;
}

#[tokio::test]
async fn test_pkce_without_interaction_never_opens_browser() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (store, _tmp) = temp_store();
    let browser = Arc::new(CountingBrowser::default());
    let manager = manager_with(store, browser.clone());
    let config = pkce_config(&server.uri());

    assert!(manager.get_token(&config, "dev", false, false).await.is_none());
    assert_eq!(browser.count(), 0);

    server.verify().await;
}

#[tokio::test]
async fn test_pkce_interactive_login_is_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("browser_access", Some("br"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (store, _tmp) = temp_store();
    let browser = Arc::new(RedirectingBrowser::new(CallbackReply::Code("code-1")));
    let manager = manager_with(store.clone(), browser);
    let config = pkce_config(&server.uri());

    let token = manager.get_token(&config, "dev", true, false).await.unwrap();
    assert_eq!(token.access_token, "browser_access");
    assert_eq!(store.load("dev"), Some(token.clone()));

    // A later non-interactive call is served from the cache.
    let cached = manager.get_token(&config, "dev", false, false).await.unwrap();
    assert_eq!(cached, token);

    server.verify().await;
}

#[tokio::test]
async fn test_environments_are_isolated() {
    let server = MockServer::start().await;
    mount_client_credentials(&server, "per_env", 2).await;

    let (store, _tmp) = temp_store();
    let manager = manager_with(store.clone(), Arc::new(CountingBrowser::default()));
    let config = client_credentials_config(&server.uri());

    manager.get_token(&config, "dev", false, false).await.unwrap();
    manager.get_token(&config, "prod", false, false).await.unwrap();
    manager.logout("dev").unwrap();

    assert!(store.load("dev").unwrap().is_expired());
    assert!(!store.load("prod").unwrap().is_expired());
    assert!(!manager.status(&config, "dev").logged_in);
    assert!(manager.status(&config, "prod").logged_in);

    server.verify().await;
}
