//! SoigneMoi CLI - command-line access to the SoigneMoi ward staff API.
//!
//! Logs in against the backend, keeps the session token valid between
//! calls and can remember credentials in the OS keychain so later runs
//! re-authenticate silently.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use soignemoi_core::api::build_http_client;
use soignemoi_core::{
    ApiClient, Config, CredentialHolder, CredentialStore, HttpAuthClient, SessionTokenManager,
    TokenStatus,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Directory for rolling log files; file logging is off when unset
const LOG_DIR_ENV: &str = "SOIGNEMOI_LOG_DIR";

const LOG_FILE_PREFIX: &str = "soignemoi.log";

#[derive(Parser)]
#[command(name = "soignemoi", version, about = "SoigneMoi ward staff client")]
struct Cli {
    /// API base URL, overriding config file and environment
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and start a session
    Login {
        #[arg(short, long)]
        username: Option<String>,

        /// Keep the password in the OS keychain for later runs
        #[arg(long)]
        remember: bool,
    },
    /// Print a valid session token
    Token,
    /// Show the session token status
    Status,
    /// Show the profile of the logged-in staff member
    Profile,
    /// Forget remembered credentials
    Logout,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    let base_url = cli
        .api_url
        .unwrap_or_else(|| config.effective_api_url());
    let api = build_api_client(&config, &base_url)?;
    info!(api_url = %base_url, "SoigneMoi CLI starting");

    match cli.command {
        Command::Login { username, remember } => {
            login(&mut config, api.session(), username, remember).await
        }
        Command::Token => {
            restore_credentials(&config, api.session())?;
            let token = api
                .session()
                .try_get_valid_token()
                .await
                .context("Could not obtain a session token")?;
            println!("{}", token);
            Ok(())
        }
        Command::Status => {
            restore_credentials(&config, api.session())?;
            status(api.session()).await;
            Ok(())
        }
        Command::Profile => {
            restore_credentials(&config, api.session())?;
            let profile = api.fetch_profile().await?;
            println!("{} ({})", profile.full_name(), profile.service_name());
            Ok(())
        }
        Command::Logout => logout(&mut config),
    }
}

fn build_api_client(config: &Config, base_url: &str) -> Result<ApiClient> {
    let http = build_http_client(config.request_timeout())
        .context("Failed to build HTTP client")?;
    let credentials = Arc::new(CredentialHolder::new());
    let auth = Arc::new(HttpAuthClient::new(http.clone(), base_url));
    let session = Arc::new(SessionTokenManager::new(auth, credentials));
    Ok(ApiClient::new(http, base_url, session))
}

/// Load remembered credentials so the session can authenticate on demand.
fn restore_credentials(config: &Config, session: &SessionTokenManager) -> Result<()> {
    let Some(username) = config.last_username.as_deref() else {
        bail!("No saved login. Run `soignemoi login --remember` first.");
    };
    if !CredentialStore::load_into(username, session.credentials())? {
        bail!(
            "No password stored for {}. Run `soignemoi login --remember` first.",
            username
        );
    }
    Ok(())
}

async fn login(
    config: &mut Config,
    session: &SessionTokenManager,
    username: Option<String>,
    remember: bool,
) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    session
        .login(username.clone(), password.clone())
        .await
        .context("Login failed")?;

    match session.snapshot().expires_at {
        Some(expires_at) => println!("Logged in as {} until {}", username, expires_at),
        None => println!("Logged in as {}", username),
    }

    if remember {
        CredentialStore::store(&username, &password)?;
        config.last_username = Some(username);
        config.save()?;
    }
    Ok(())
}

async fn status(session: &SessionTokenManager) {
    if let Err(e) = session.try_get_valid_token().await {
        println!("Not authenticated: {}", e);
        return;
    }

    let state = session.snapshot();
    let label = match session.status() {
        TokenStatus::Empty => "empty",
        TokenStatus::Valid => "valid",
        TokenStatus::Expired => "expired",
    };
    println!("Token: {}", label);
    if let Some(expires_at) = state.expires_at {
        println!("Expires: {}", expires_at);
    }
    if let Some(claims) = session.claims() {
        if let Some(username) = claims.username {
            println!("User: {}", username);
        }
        if !claims.roles.is_empty() {
            println!("Roles: {}", claims.roles.join(", "));
        }
    }
}

fn logout(config: &mut Config) -> Result<()> {
    if let Some(username) = config.last_username.take() {
        if CredentialStore::delete(&username)? {
            info!(%username, "Removed remembered password");
        }
        config.save()?;
    }
    println!("Logged out");
    Ok(())
}

fn prompt_username(default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("Username [{}]: ", default),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), default) {
        (false, _) => Ok(input.to_string()),
        (true, Some(default)) => Ok(default.to_string()),
        (true, None) => bail!("Username is required"),
    }
}
