//! lmi - OAuth2-authenticated API client
//!
//! Main entry point for the lmi command-line application.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lmi::cli::{AuthCommand, Cli, Commands};
use lmi::commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(&cli);

    match cli.command {
        Commands::Auth { command } => match command {
            AuthCommand::Login { environment, force } => {
                tracing::info!("Starting login for environment: {}", environment);
                commands::auth::login(&environment, force).await
            }
            AuthCommand::Logout { environment } => commands::auth::logout(&environment),
            AuthCommand::Status { environment, json } => {
                commands::auth::status(&environment, json)
            }
        },
        Commands::Request {
            method,
            url,
            data,
            environment,
        } => commands::request::send(&method, &url, data.as_deref(), &environment).await,
    }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` overrides the verbosity flags. Logs go to stderr so command
/// output on stdout stays machine-readable.
fn init_tracing(cli: &Cli) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if cli.log_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
