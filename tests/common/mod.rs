use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use url::Url;

use lmi::auth::flow::{BrowserOpener, LoopbackAuthorizer};
use lmi::auth::grant::GrantClient;
use lmi::auth::manager::TokenManager;
use lmi::auth::token_store::FileTokenStore;
use lmi::config::OAuthConfig;

#[allow(dead_code)]
pub fn client_credentials_config(server_uri: &str) -> OAuthConfig {
    let mut map = HashMap::new();
    map.insert("OAUTH_CLIENT_ID".to_string(), "cli-app".to_string());
    map.insert("OAUTH_CLIENT_SECRET".to_string(), "cli-secret".to_string());
    map.insert("OAUTH_TOKEN_URL".to_string(), format!("{}/token", server_uri));
    OAuthConfig::from_map(&map).expect("valid client_credentials config")
}

#[allow(dead_code)]
pub fn password_config(server_uri: &str) -> OAuthConfig {
    let mut map = HashMap::new();
    map.insert("OAUTH_GRANT_TYPE".to_string(), "password".to_string());
    map.insert("OAUTH_CLIENT_ID".to_string(), "cli-app".to_string());
    map.insert("OAUTH_CLIENT_SECRET".to_string(), "cli-secret".to_string());
    map.insert("OAUTH_USERNAME".to_string(), "alice".to_string());
    map.insert("OAUTH_PASSWORD".to_string(), "p@ss word".to_string());
    map.insert("OAUTH_TOKEN_URL".to_string(), format!("{}/token", server_uri));
    OAuthConfig::from_map(&map).expect("valid password config")
}

#[allow(dead_code)]
pub fn pkce_config(server_uri: &str) -> OAuthConfig {
    let mut map = HashMap::new();
    map.insert(
        "OAUTH_GRANT_TYPE".to_string(),
        "authorization_code_pkce".to_string(),
    );
    map.insert("OAUTH_CLIENT_ID".to_string(), "cli-app".to_string());
    map.insert("OAUTH_TOKEN_URL".to_string(), format!("{}/token", server_uri));
    map.insert(
        "OAUTH_AUTHORIZE_URL".to_string(),
        format!("{}/authorize", server_uri),
    );
    OAuthConfig::from_map(&map).expect("valid pkce config")
}

/// Returns a token endpoint response body.
#[allow(dead_code)]
pub fn token_body(access_token: &str, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}

#[allow(dead_code)]
pub fn temp_store() -> (Arc<FileTokenStore>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = Arc::new(FileTokenStore::new(tmp.path().join("tokens")));
    (store, tmp)
}

/// Builds a manager over `store` whose PKCE logins go through `browser`.
#[allow(dead_code)]
pub fn manager_with(store: Arc<FileTokenStore>, browser: Arc<dyn BrowserOpener>) -> TokenManager {
    let grants = GrantClient::new().expect("http client");
    let authorizer = LoopbackAuthorizer::new(grants.clone(), browser)
        .with_callback_timeout(Duration::from_secs(5));
    TokenManager::new(store, grants, authorizer)
}

// ---------------------------------------------------------------------------
// Test browsers
// ---------------------------------------------------------------------------

/// Counts how often it was asked to open a URL and does nothing else.
#[allow(dead_code)]
#[derive(Default)]
pub struct CountingBrowser {
    opened: AtomicUsize,
}

#[allow(dead_code)]
impl CountingBrowser {
    pub fn count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl BrowserOpener for CountingBrowser {
    fn open(&self, _url: &str) -> lmi::Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What the simulated authorization server puts in the redirect.
#[allow(dead_code)]
#[derive(Clone)]
pub enum CallbackReply {
    Code(&'static str),
    ForgedState,
    Error(&'static str),
    /// The user never completes the login.
    Silent,
    /// A connection that starts a request and never finishes it.
    Stall,
}

/// Plays the user: follows the authorization URL straight to the loopback
/// redirect with the configured reply.
#[allow(dead_code)]
pub struct RedirectingBrowser {
    reply: CallbackReply,
    opened: Mutex<Option<Url>>,
    response: Mutex<Option<JoinHandle<(u16, String)>>>,
}

#[allow(dead_code)]
impl RedirectingBrowser {
    pub fn new(reply: CallbackReply) -> Self {
        Self {
            reply,
            opened: Mutex::new(None),
            response: Mutex::new(None),
        }
    }

    /// The authorization URL that was opened.
    pub fn opened_url(&self) -> Url {
        self.opened
            .lock()
            .unwrap()
            .clone()
            .expect("browser was not opened")
    }

    /// Query parameter of the opened authorization URL.
    pub fn param(&self, name: &str) -> String {
        self.opened_url()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| panic!("authorization URL has no {name}"))
    }

    /// Port of the loopback redirect URI.
    pub fn redirect_port(&self) -> u16 {
        Url::parse(&self.param("redirect_uri"))
            .unwrap()
            .port()
            .expect("redirect URI has a port")
    }

    /// Status and body of the page the loopback listener served.
    pub async fn callback_response(&self) -> (u16, String) {
        let handle = self
            .response
            .lock()
            .unwrap()
            .take()
            .expect("callback was not sent");
        handle.await.unwrap()
    }
}

impl BrowserOpener for RedirectingBrowser {
    fn open(&self, url: &str) -> lmi::Result<()> {
        let auth_url = Url::parse(url)?;
        let params: HashMap<String, String> = auth_url.query_pairs().into_owned().collect();
        let mut callback = Url::parse(&params["redirect_uri"])?;

        *self.opened.lock().unwrap() = Some(auth_url);

        match &self.reply {
            CallbackReply::Silent => return Ok(()),
            CallbackReply::Stall => {
                let port = callback.port().expect("redirect URI has a port");
                let handle = tokio::spawn(stall_connection(port));
                *self.response.lock().unwrap() = Some(handle);
                return Ok(());
            }
            CallbackReply::Code(code) => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", &params["state"]);
            }
            CallbackReply::ForgedState => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", "stolen-code")
                    .append_pair("state", "forged-state");
            }
            CallbackReply::Error(error) => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("state", &params["state"]);
            }
        }

        let handle = tokio::spawn(async move {
            let resp = reqwest::get(callback).await.expect("callback request");
            let status = resp.status().as_u16();
            (status, resp.text().await.unwrap_or_default())
        });
        *self.response.lock().unwrap() = Some(handle);
        Ok(())
    }
}

/// Sends half a request line and waits for the listener to hang up.
///
/// Reports `"closed"` when the server side drops the connection and
/// `"open"` if it is still held after two seconds.
async fn stall_connection(port: u16) -> (u16, String) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("loopback listener accepts");
    stream
        .write_all(b"GET /callback?code=late")
        .await
        .expect("partial request written");

    let mut buf = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => (0, "closed".to_string()),
        Ok(Ok(_)) => (0, "answered".to_string()),
        Err(_) => (0, "open".to_string()),
    }
}
