//! `lmi auth` handlers: login, logout, and status

use colored::Colorize;
use prettytable::{format, row, Table};

use crate::auth::manager::AuthStatus;
use crate::auth::token_store::validate_environment;
use crate::config::{env_map, OAuthConfig, TokenStorageKind};
use crate::error::{LmiError, Result};

/// Obtain a token for `environment`, interactively if the grant requires it.
///
/// # Arguments
///
/// * `environment` - Environment name the token is cached under
/// * `force` - Skip any cached token and acquire a new one
///
/// # Errors
///
/// Returns `LmiError::Configuration` for invalid `OAUTH_*` settings and
/// `LmiError::AuthenticationFailure` when no token could be obtained.
pub async fn login(environment: &str, force: bool) -> Result<()> {
    validate_environment(environment)?;
    let config = OAuthConfig::from_env()?;
    let manager = super::token_manager(config.storage)?;

    println!(
        "Logging in to {} using the {} grant...",
        environment.cyan(),
        config.grant_type
    );

    match manager.get_token(&config, environment, true, force).await {
        Some(token) => {
            println!(
                "{} Logged in to {} (token expires {})",
                "✓".green(),
                environment.cyan(),
                token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(())
        }
        None => Err(LmiError::AuthenticationFailure(format!(
            "login to '{environment}' failed; rerun with -v for details"
        ))
        .into()),
    }
}

/// Invalidate the cached token for `environment`.
///
/// Only `OAUTH_TOKEN_STORAGE` is read, so logging out works even when the
/// rest of the configuration is incomplete.
pub fn logout(environment: &str) -> Result<()> {
    validate_environment(environment)?;
    let storage = TokenStorageKind::from_map(&env_map())?;
    let manager = super::token_manager(storage)?;
    manager.logout(environment)?;
    println!("{} Logged out of {}", "✓".green(), environment.cyan());
    Ok(())
}

/// Print the cached token state for `environment`.
pub fn status(environment: &str, json: bool) -> Result<()> {
    validate_environment(environment)?;
    let config = OAuthConfig::from_env()?;
    let manager = super::token_manager(config.storage)?;
    let status = manager.status(&config, environment);

    if json {
        let rendered = serde_json::to_string_pretty(&status).map_err(LmiError::Serialization)?;
        println!("{}", rendered);
    } else {
        println!("\nAuthentication status:");
        status_table(&status).printstd();
        println!();
        if !status.logged_in {
            println!(
                "Use {} to log in.",
                format!("lmi auth login -e {}", environment).cyan()
            );
        }
    }
    Ok(())
}

fn status_table(status: &AuthStatus) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    let logged_in = if status.logged_in {
        "Yes".green()
    } else {
        "No".red()
    };
    let expires_at = status
        .expires_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    let expires_in = status
        .expires_in
        .map(|s| format!("{}s", s))
        .unwrap_or_else(|| "-".to_string());

    table.add_row(row!["Environment".bold(), status.environment]);
    table.add_row(row!["Logged in".bold(), logged_in]);
    table.add_row(row!["Grant type".bold(), status.grant_type]);
    table.add_row(row!["Expires at".bold(), expires_at]);
    table.add_row(row!["Expires in".bold(), expires_in]);
    table.add_row(row![
        "Refresh token".bold(),
        yes_no(status.has_refresh_token)
    ]);
    table.add_row(row!["ID token".bold(), yes_no(status.has_id_token)]);
    table
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}
