//! Interactive OAuth 2.0 authorization code flow with PKCE
//!
//! [`LoopbackAuthorizer`] drives one browser login:
//!
//! 1. Generate a PKCE verifier/challenge and a random `state` value.
//! 2. Bind a TCP listener on an OS-assigned loopback port.
//! 3. Build the authorization URL and open it in the user's browser.
//! 4. Serve the listener on a background task; the first `GET /callback`
//!    is validated and its outcome is sent over a oneshot channel.
//! 5. Wait on that channel with a hard deadline.
//! 6. Tear the listener down, then exchange the authorization code.
//!
//! Login phases:
//!
//! ```text
//! Idle -> ServerBound -> AwaitingCallback -> CallbackReceived -> Exchanging -> Issued
//!                                         \-> TimedOut           \-> ExchangeFailed
//! ```
//!
//! The listener is closed on every exit path: explicitly before the exchange,
//! and by [`Drop`] if the future is cancelled.
//!
//! # References
//!
//! - RFC 7636 PKCE <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 8252 OAuth 2.0 for Native Apps <https://www.rfc-editor.org/rfc/rfc8252>

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use crate::auth::grant::GrantClient;
use crate::auth::pkce;
use crate::auth::token_store::Token;
use crate::config::OAuthConfig;
use crate::error::{LmiError, Result};

/// How long a login waits for the browser redirect.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Path the authorization server redirects to.
pub const CALLBACK_PATH: &str = "/callback";

/// Per-connection deadline for reading the request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Request heads longer than this many lines are cut off.
const MAX_HEADER_LINES: usize = 100;

const SUCCESS_HTML: &str = "<html><body><h1>Authentication successful!</h1>\
    <p>You can close this window and return to the CLI.</p></body></html>";
const FAILURE_HTML: &str = "<html><body><h1>Authentication failed</h1>\
    <p>You can close this window and retry from the CLI.</p></body></html>";
const ALREADY_HANDLED_HTML: &str = "<html><body><h1>Login already handled</h1>\
    <p>This login request was already completed.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not found</h1></body></html>";

// ---------------------------------------------------------------------------
// Browser capability
// ---------------------------------------------------------------------------

/// Capability to show a URL to the user.
pub trait BrowserOpener: Send + Sync {
    /// Opens `url` in the user's default browser.
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        #[cfg(target_os = "macos")]
        let mut command = std::process::Command::new("open");
        #[cfg(target_os = "windows")]
        let mut command = {
            let mut command = std::process::Command::new("rundll32");
            command.arg("url.dll,FileProtocolHandler");
            command
        };
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let mut command = std::process::Command::new("xdg-open");

        command.arg(url).spawn().map_err(LmiError::Io)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoginPhase
// ---------------------------------------------------------------------------

/// Progress of one interactive login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    /// Nothing allocated yet
    Idle,
    /// Listener bound, authorization URL built
    ServerBound,
    /// Browser opened, waiting for the redirect
    AwaitingCallback,
    /// Redirect accepted and validated
    CallbackReceived,
    /// Deadline passed without a redirect
    TimedOut,
    /// Authorization code being exchanged
    Exchanging,
    /// Token obtained
    Issued,
    /// Redirect rejected or exchange refused
    ExchangeFailed,
}

impl LoginPhase {
    /// Returns `true` for phases that end the attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoginPhase::Issued | LoginPhase::ExchangeFailed | LoginPhase::TimedOut
        )
    }
}

fn enter(phase: &mut LoginPhase, next: LoginPhase) {
    tracing::debug!("PKCE login: {:?} -> {:?}", phase, next);
    *phase = next;
}

// ---------------------------------------------------------------------------
// LoopbackAuthorizer
// ---------------------------------------------------------------------------

/// Runs the browser-based authorization code flow with PKCE.
///
/// Holds no per-login state: the verifier, `state`, and port are created
/// inside [`authorize`](Self::authorize) and dropped when it returns.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use lmi::auth::flow::{LoopbackAuthorizer, SystemBrowser};
/// use lmi::auth::grant::GrantClient;
///
/// # fn example() -> lmi::error::Result<()> {
/// let authorizer = LoopbackAuthorizer::new(GrantClient::new()?, Arc::new(SystemBrowser))
///     .with_callback_timeout(Duration::from_secs(120));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LoopbackAuthorizer {
    grants: GrantClient,
    browser: Arc<dyn BrowserOpener>,
    callback_timeout: Duration,
}

impl LoopbackAuthorizer {
    /// Creates an authorizer with the default 300-second callback deadline.
    pub fn new(grants: GrantClient, browser: Arc<dyn BrowserOpener>) -> Self {
        Self {
            grants,
            browser,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Overrides how long to wait for the browser redirect.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Runs one interactive login and returns the issued token.
    ///
    /// # Errors
    ///
    /// - [`LmiError::Configuration`] if `OAUTH_AUTHORIZE_URL` is absent.
    /// - [`LmiError::LoginTimeout`] if no callback arrives in time.
    /// - [`LmiError::AuthorizationDenied`] if the server redirected with
    ///   `error`.
    /// - [`LmiError::CallbackStateMismatch`] if `state` does not match; no
    ///   token request is made.
    /// - [`LmiError::Acquisition`] if the code exchange is rejected.
    pub async fn authorize(&self, config: &OAuthConfig) -> Result<Token> {
        let authorize_url = config.authorize_url.as_ref().ok_or_else(|| {
            LmiError::Configuration("OAUTH_AUTHORIZE_URL is required for PKCE login".to_string())
        })?;

        let mut phase = LoginPhase::Idle;
        let pkce = pkce::generate();
        let state = pkce::generate_state();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(LmiError::Io)?;
        let port = listener.local_addr().map_err(LmiError::Io)?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
        let auth_url = build_authorization_url(
            authorize_url,
            config,
            &redirect_uri,
            &state,
            &pkce.challenge,
        );
        enter(&mut phase, LoginPhase::ServerBound);

        let (tx, rx) = oneshot::channel();
        let server = CallbackServer::spawn(listener, state, tx);

        eprintln!(
            "Open the following URL in your browser to log in:\n{}",
            auth_url
        );
        if let Err(e) = self.browser.open(auth_url.as_str()) {
            tracing::warn!("Failed to open browser: {}", e);
        }
        enter(&mut phase, LoginPhase::AwaitingCallback);

        let outcome = match tokio::time::timeout(self.callback_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(LmiError::InvalidCallback(
                "callback listener stopped unexpectedly".to_string(),
            )),
            Err(_) => Err(LmiError::LoginTimeout),
        };
        server.shutdown().await;

        let code = match outcome {
            Ok(code) => {
                enter(&mut phase, LoginPhase::CallbackReceived);
                code
            }
            Err(e) => {
                let next = if matches!(e, LmiError::LoginTimeout) {
                    LoginPhase::TimedOut
                } else {
                    LoginPhase::ExchangeFailed
                };
                enter(&mut phase, next);
                tracing::warn!("PKCE login failed: {}", e);
                return Err(e.into());
            }
        };

        enter(&mut phase, LoginPhase::Exchanging);
        match self
            .grants
            .authorization_code(config, &code, &pkce.verifier, &redirect_uri)
            .await
        {
            Ok(token) => {
                enter(&mut phase, LoginPhase::Issued);
                tracing::info!("PKCE login completed");
                Ok(token)
            }
            Err(e) => {
                enter(&mut phase, LoginPhase::ExchangeFailed);
                Err(e)
            }
        }
    }
}

/// Builds the authorization request URL.
fn build_authorization_url(
    authorize_url: &Url,
    config: &OAuthConfig,
    redirect_uri: &str,
    state: &str,
    code_challenge: &str,
) -> Url {
    let mut url = authorize_url.clone();
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &config.scope_string())
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", pkce::S256);
    url
}

// ---------------------------------------------------------------------------
// Callback server
// ---------------------------------------------------------------------------

type CallbackOutcome = std::result::Result<String, LmiError>;

/// Single-use sender; the first valid callback takes it.
type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

/// Background task serving the loopback listener.
///
/// Aborting the task drops the listener and every connection task.
struct CallbackServer {
    handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    fn spawn(
        listener: TcpListener,
        expected_state: String,
        tx: oneshot::Sender<CallbackOutcome>,
    ) -> Self {
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(tx)));
        let handle = tokio::spawn(serve(listener, Arc::new(expected_state), slot));
        Self {
            handle: Some(handle),
        }
    }

    /// Stops the server and waits until the listener is closed.
    async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        tracing::debug!("Callback listener closed");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn serve(listener: TcpListener, expected_state: Arc<String>, slot: CallbackSlot) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    let expected_state = Arc::clone(&expected_state);
                    let slot = Arc::clone(&slot);
                    connections.spawn(async move {
                        handle_connection(stream, &expected_state, &slot).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to accept callback connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next() => {}
        }
    }
}

async fn handle_connection(mut stream: TcpStream, expected_state: &str, slot: &CallbackSlot) {
    let request_line =
        match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_line(&mut stream)).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                tracing::debug!("Failed to read callback request: {}", e);
                return;
            }
            Err(_) => {
                tracing::debug!("Callback connection sent no request in time");
                return;
            }
        };

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    let is_callback = method == "GET" && target.split('?').next() == Some(CALLBACK_PATH);
    if !is_callback {
        let _ = write_response(&mut stream, "404 Not Found", NOT_FOUND_HTML).await;
        return;
    }

    let sender = slot.lock().ok().and_then(|mut guard| guard.take());
    let Some(sender) = sender else {
        tracing::debug!("Ignoring callback received after the first");
        let _ = write_response(&mut stream, "409 Conflict", ALREADY_HANDLED_HTML).await;
        return;
    };

    let outcome = evaluate_callback(target, expected_state);
    let (status, body) = match outcome {
        Ok(_) => ("200 OK", SUCCESS_HTML),
        Err(_) => ("400 Bad Request", FAILURE_HTML),
    };
    if let Err(e) = write_response(&mut stream, status, body).await {
        tracing::debug!("Failed to write callback response: {}", e);
    }
    let _ = sender.send(outcome);
}

/// Reads the request line and drains the header block.
async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }

    let mut header = String::new();
    for _ in 0..MAX_HEADER_LINES {
        header.clear();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header.trim_end().is_empty() {
            break;
        }
    }
    Ok(Some(request_line.trim_end().to_string()))
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Validates a callback request target and extracts the authorization code.
fn evaluate_callback(target: &str, expected_state: &str) -> CallbackOutcome {
    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| LmiError::InvalidCallback(format!("unparsable callback target: {e}")))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let reason = match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        return Err(LmiError::AuthorizationDenied(reason));
    }

    if state.as_deref() != Some(expected_state) {
        return Err(LmiError::CallbackStateMismatch);
    }

    code.filter(|c| !c.is_empty()).ok_or_else(|| {
        LmiError::InvalidCallback("authorization code missing from callback".to_string())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
