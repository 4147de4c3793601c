//! `lmi request` handler

use reqwest::Method;

use crate::auth::client::AuthenticatedClient;
use crate::auth::token_store::validate_environment;
use crate::config::OAuthConfig;
use crate::error::{LmiError, Result};

/// Send `method url` with the environment's token and print the response.
///
/// JSON response bodies are pretty-printed. A non-success status is reported
/// as an error after the body is printed.
pub async fn send(method: &str, url: &str, data: Option<&str>, environment: &str) -> Result<()> {
    validate_environment(environment)?;
    let method = parse_method(method)?;
    let body = data
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(LmiError::Serialization)?;

    let config = OAuthConfig::from_env()?;
    let manager = super::token_manager(config.storage)?;
    let client = AuthenticatedClient::connect(&manager, &config, environment).await?;

    let resp = client
        .request_with(method.clone(), url, |builder| match &body {
            Some(value) => builder.json(value),
            None => builder,
        })
        .await?;

    let status = resp.status();
    let text = resp.text().await.map_err(LmiError::Http)?;
    println!("{}", pretty_body(&text));

    if !status.is_success() {
        return Err(anyhow::anyhow!("{} {} returned {}", method, url, status));
    }
    Ok(())
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| LmiError::Configuration(format!("invalid HTTP method: {raw}")).into())
}

fn pretty_body(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| text.to_string())
}
