//! Campus Dashboard - session shell for the student learning dashboard
//!
//! This binary drives the same session layer the web dashboard uses:
//! - Restore a stored credential into every service client
//! - Resolve the session for a route and report what the guard decides
//! - Sign in, register and sign out against the identity service

mod browser;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "campus-dashboard")]
#[command(author = "Campus Dashboard Team")]
#[command(version)]
#[command(about = "Session shell for the Campus learning dashboard")]
#[command(long_about = "
Campus Dashboard resolves who is signed in against the identity service
and decides, per route, whether to render it, show a loading state or send
the user to the login page.

Quick start:
  1. Sign in:        campus-dashboard login --username <name>
  2. Check session:  campus-dashboard status
  3. Open a page:    campus-dashboard open /dashboard/courses --browser
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show who is signed in
    Status,

    /// Resolve the session for a route and show what the guard decides
    Open {
        /// Dashboard route, e.g. /dashboard/courses
        route: String,

        /// Open the final route in the web dashboard
        #[arg(short, long)]
        browser: bool,
    },

    /// Sign in with username and password
    #[command(alias = "signin")]
    Login {
        #[arg(short, long)]
        username: String,

        /// Password (falls back to CAMPUS_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create a student account and sign in
    #[command(alias = "register")]
    Signup {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        /// Password (falls back to CAMPUS_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and forget the stored credential
    #[command(alias = "signout")]
    Logout,

    /// List the signed-in user's sessions on the identity service
    Sessions {
        /// Revoke the session with this id first
        #[arg(long)]
        revoke: Option<i64>,
    },

    /// Change the account password
    ResetPassword {
        #[arg(short, long)]
        email: String,

        /// Current password (falls back to CAMPUS_PASSWORD)
        #[arg(long)]
        old_password: Option<String>,

        #[arg(long)]
        new_password: String,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("campus_dashboard={},campus_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Status => commands::cmd_status(cli.format).await,
        Commands::Open { route, browser } => commands::cmd_open(cli.format, route, *browser).await,
        Commands::Login { username, password } => {
            commands::cmd_login(cli.format, username, password.clone()).await
        }
        Commands::Signup {
            username,
            email,
            password,
        } => commands::cmd_signup(cli.format, username, email, password.clone()).await,
        Commands::Logout => commands::cmd_logout(cli.format).await,
        Commands::Sessions { revoke } => commands::cmd_sessions(cli.format, *revoke).await,
        Commands::ResetPassword {
            email,
            old_password,
            new_password,
        } => commands::cmd_reset_password(cli.format, email, old_password.clone(), new_password).await,
        Commands::Config => commands::cmd_config(cli.format),
    }
}
