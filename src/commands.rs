use crate::browser::open_in_browser;
use crate::OutputFormat;
use anyhow::{Context, Result};
use campus_core::api::{config, load_api_config};
use campus_core::auth::{default_credential_store, CredentialStore, RecordingNavigator, Resolution, LOGIN_ROUTE};
use campus_core::{ApiEndpointConfig, GuardAction, Route, SessionCoordinator, SessionState};
use serde::Serialize;
use std::sync::Arc;

/// Environment variable consulted when `--password` is not given
const ENV_PASSWORD: &str = "CAMPUS_PASSWORD";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStatus {
    pub authenticated: bool,
    pub state: &'static str,
    pub route: Route,
    pub guard: GuardAction,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    /// Why the check failed, when it did
    pub failure: Option<String>,
    pub api_url: String,
    pub credential_storage: String,
}

struct Shell {
    app: SessionCoordinator,
    navigator: Arc<RecordingNavigator>,
    config: ApiEndpointConfig,
    storage_info: String,
}

impl Shell {
    fn open() -> Result<Self> {
        let config = load_api_config();
        let store: Arc<dyn CredentialStore> = Arc::from(
            default_credential_store().context("Failed to open credential store")?,
        );
        let storage_info = store.describe();
        let navigator = Arc::new(RecordingNavigator::new());
        let app = SessionCoordinator::new(config.clone(), store, navigator.clone())?;
        Ok(Self {
            app,
            navigator,
            config,
            storage_info,
        })
    }

    /// Mount on `route`, following a login redirect if one was issued.
    async fn enter(&self, route: &str) -> Result<Resolution> {
        let mut resolution = self.app.mount(route).await.context("Failed to restore session")?;
        if let Some(target) = self.navigator.take_last() {
            tracing::debug!("Following redirect to {}", target);
            resolution = self.app.navigate(target.as_str()).await;
        }
        Ok(resolution)
    }

    fn status(&self, resolution: &Resolution) -> DashboardStatus {
        let state = self.app.state();
        let user = state.user();
        let failure = match resolution {
            Resolution::Settled { failure, .. } => failure.as_ref().map(|e| e.to_string()),
            Resolution::Superseded { .. } => None,
        };
        DashboardStatus {
            authenticated: user.is_some(),
            state: state.label(),
            route: self.app.current_route(),
            guard: self.app.guard(),
            user_id: user.map(|u| u.id.clone()),
            user_name: user.map(|u| u.name.clone()),
            user_email: user.map(|u| u.email.clone()),
            failure,
            api_url: self.config.base_url.clone(),
            credential_storage: self.storage_info.clone(),
        }
    }
}

fn resolve_password(password: Option<String>) -> Result<String> {
    password
        .or_else(|| std::env::var(ENV_PASSWORD).ok())
        .filter(|p| !p.is_empty())
        .with_context(|| format!("No password given; pass --password or set {}", ENV_PASSWORD))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_signed_in(format: OutputFormat, status: &DashboardStatus, verb: &str) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if status.authenticated {
                println!(
                    "{} as {} <{}>",
                    verb,
                    status.user_name.as_deref().unwrap_or("-"),
                    status.user_email.as_deref().unwrap_or("-")
                );
                println!("Now at {}", status.route);
            } else {
                // Credentials were accepted but the session check was not
                println!("{}, but the session could not be confirmed", verb);
                if let Some(failure) = &status.failure {
                    println!("Reason: {}", failure);
                }
            }
        }
        OutputFormat::Json => print_json(status)?,
    }
    Ok(())
}

pub async fn cmd_status(format: OutputFormat) -> Result<()> {
    let shell = Shell::open()?;
    let resolution = shell.app.mount("/dashboard").await.context("Failed to restore session")?;
    let status = shell.status(&resolution);

    match format {
        OutputFormat::Text => {
            if status.authenticated {
                println!("Status: Signed in");
                println!("Name:   {}", status.user_name.as_deref().unwrap_or("-"));
                println!("Email:  {}", status.user_email.as_deref().unwrap_or("-"));
            } else {
                println!("Status: Not signed in");
                if let Some(failure) = &status.failure {
                    println!("Reason: {}", failure);
                }
                println!();
                println!("Run 'campus-dashboard login --username <name>' to sign in.");
            }
            println!();
            println!("API:     {}", status.api_url);
            println!("Storage: {}", status.credential_storage);
        }
        OutputFormat::Json => print_json(&status)?,
    }

    Ok(())
}

pub async fn cmd_open(format: OutputFormat, route: &str, browser: bool) -> Result<()> {
    let shell = Shell::open()?;
    let resolution = shell.enter(route).await?;
    let status = shell.status(&resolution);

    let opened = if browser {
        Some(open_in_browser(&shell.config, &status.route)?)
    } else {
        None
    };

    match format {
        OutputFormat::Text => {
            let requested = Route::new(route);
            if requested != status.route {
                println!("{} requires sign-in, redirected to {}", requested, status.route);
            }
            let action = match status.guard {
                GuardAction::Render => "render",
                GuardAction::RedirectToLogin => "redirect to login",
                GuardAction::RenderLoading => "loading",
            };
            println!("Route:   {}", status.route);
            println!("Session: {}", status.state);
            println!("Guard:   {}", action);
            if let Some(url) = &opened {
                println!("Opened:  {}", url);
            }
        }
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "requested": Route::new(route),
                "status": status,
                "opened": opened,
            }))?;
        }
    }

    Ok(())
}

pub async fn cmd_login(format: OutputFormat, username: &str, password: Option<String>) -> Result<()> {
    let password = resolve_password(password)?;
    let shell = Shell::open()?;

    if let Resolution::Settled {
        state: SessionState::Authenticated(user),
        ..
    } = shell.enter(LOGIN_ROUTE).await?
    {
        match format {
            OutputFormat::Text => {
                println!("Already signed in as {} <{}>", user.name, user.email);
                println!("Use 'campus-dashboard logout' to sign out first.");
            }
            OutputFormat::Json => {
                print_json(&serde_json::json!({
                    "status": "already_signed_in",
                    "user": user,
                }))?;
            }
        }
        return Ok(());
    }

    let resolution = shell.app.sign_in(username, &password).await?;
    print_signed_in(format, &shell.status(&resolution), "Signed in")
}

pub async fn cmd_signup(
    format: OutputFormat,
    username: &str,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let password = resolve_password(password)?;
    let shell = Shell::open()?;
    shell.enter(campus_core::auth::SIGNUP_ROUTE).await?;

    let resolution = shell.app.sign_up(username, email, &password).await?;
    print_signed_in(format, &shell.status(&resolution), "Registered and signed in")
}

pub async fn cmd_logout(format: OutputFormat) -> Result<()> {
    let shell = Shell::open()?;
    let sync = shell.app.synchronizer();

    if sync.store().load().context("Failed to read stored credential")?.is_none() {
        match format {
            OutputFormat::Text => println!("Not signed in."),
            OutputFormat::Json => print_json(&serde_json::json!({ "status": "not_signed_in" }))?,
        }
        return Ok(());
    }

    // The logout call carries the current bearer token
    sync.hydrate().context("Failed to restore session")?;
    shell.app.sign_out().await?;

    match format {
        OutputFormat::Text => println!("Signed out."),
        OutputFormat::Json => print_json(&serde_json::json!({
            "status": "signed_out",
            "route": shell.navigator.take_last(),
        }))?,
    }

    Ok(())
}

pub async fn cmd_sessions(format: OutputFormat, revoke: Option<i64>) -> Result<()> {
    let shell = Shell::open()?;
    let user = match shell.enter("/dashboard").await? {
        Resolution::Settled {
            state: SessionState::Authenticated(user),
            ..
        } => user,
        _ => anyhow::bail!("Not signed in; run 'campus-dashboard login --username <name>' first"),
    };
    let identity = shell.app.identity();

    if let Some(id) = revoke {
        identity
            .revoke_session(id)
            .await
            .with_context(|| format!("Failed to revoke session {}", id))?;
        tracing::info!("Revoked session {}", id);
    }

    let sessions = identity
        .list_sessions(&user.name)
        .await
        .context("Failed to list sessions")?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions for {}.", user.name);
            }
            for session in &sessions {
                let expiry = session
                    .refresh_token_expiry
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6}  {:<16} {:<8} until {}",
                    session.id,
                    session.client_id.as_deref().unwrap_or("-"),
                    if session.is_live() { "live" } else { "expired" },
                    expiry
                );
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "user": user.name,
            "revoked": revoke,
            "sessions": sessions,
        }))?,
    }

    Ok(())
}

pub async fn cmd_reset_password(
    format: OutputFormat,
    email: &str,
    old_password: Option<String>,
    new_password: &str,
) -> Result<()> {
    let old_password = resolve_password(old_password)?;
    if new_password.is_empty() {
        anyhow::bail!("New password must not be empty");
    }
    let shell = Shell::open()?;

    shell
        .app
        .identity()
        .reset_password(email, &old_password, new_password)
        .await
        .context("Password reset failed")?;

    match format {
        OutputFormat::Text => println!("Password changed for {}.", email),
        OutputFormat::Json => print_json(&serde_json::json!({ "status": "password_changed", "email": email }))?,
    }
    Ok(())
}

pub fn cmd_config(format: OutputFormat) -> Result<()> {
    let api = load_api_config();
    let config_path = config::get_config_file_path_string();
    let storage = default_credential_store()
        .map(|store| store.describe())
        .unwrap_or_else(|e| format!("unavailable ({})", e));

    match format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("API endpoint:     {} (from {})", api.base_url, api.source);
            println!("Identity service: {}", api.identity_url);
            println!("Web dashboard:    {}", api.web_url);
            println!("Request timeout:  {}s", api.request_timeout.as_secs());
            println!("Credential store: {}", storage);
            println!();
            println!("Environment variables:");
            println!("  {} - Override API base URL", config::ENV_API_URL);
            println!("  {} - Password for login/signup", ENV_PASSWORD);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "config_file": config_path,
                "api_url": api.base_url,
                "api_source": api.source.to_string(),
                "identity_url": api.identity_url,
                "course_url": api.course_url,
                "assessment_url": api.assessment_url,
                "dashboard_url": api.dashboard_url,
                "profile_url": api.profile_url,
                "student_management_url": api.student_management_url,
                "web_url": api.web_url,
                "request_timeout_secs": api.request_timeout.as_secs(),
                "credential_storage": storage,
            }))?;
        }
    }

    Ok(())
}
