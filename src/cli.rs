//! Command-line interface definition for lmi
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for login, logout, status, and authenticated requests.

use clap::{ArgAction, Parser, Subcommand};

/// Environment used when `--environment` is not given
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// lmi - OAuth2-authenticated API client
///
/// Credentials are read from `OAUTH_*` environment variables and tokens are
/// cached per environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "lmi")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for lmi
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage cached credentials
    Auth {
        /// Authentication subcommand
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Send an authenticated HTTP request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,

        /// Absolute request URL
        url: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Environment whose token is used
        #[arg(short, long, default_value = DEFAULT_ENVIRONMENT)]
        environment: String,
    },
}

/// Authentication subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommand {
    /// Obtain a token, opening a browser when the grant requires it
    Login {
        /// Environment to log in to
        #[arg(short, long, default_value = DEFAULT_ENVIRONMENT)]
        environment: String,

        /// Ignore any cached token and acquire a new one
        #[arg(short, long)]
        force: bool,
    },

    /// Invalidate the cached token
    Logout {
        /// Environment to log out of
        #[arg(short, long, default_value = DEFAULT_ENVIRONMENT)]
        environment: String,
    },

    /// Show the cached token state
    Status {
        /// Environment to inspect
        #[arg(short, long, default_value = DEFAULT_ENVIRONMENT)]
        environment: String,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Default tracing directive for the requested verbosity
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "lmi=warn",
            1 => "lmi=info",
            _ => "lmi=debug",
        }
    }
}
