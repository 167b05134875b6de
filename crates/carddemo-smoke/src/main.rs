//! CardDemo smoke run - exercises the client core against a live API.
//!
//! Logs in, checks the session, fetches the account list through the retry
//! and notification path, prints whatever notifications were raised, then
//! logs out. Useful for checking a deployment end to end.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use carddemo_core::auth::{FileStore, KeyValueStore, KeyringStore};
use carddemo_core::signals::{Signal, SignalKind};
use carddemo_core::{ClientConfig, ClientContext, Credential, SystemClock};

/// Directory for daily rolling log files; stderr only when unset
const LOG_DIR_ENV: &str = "CARDDEMO_LOG_DIR";

/// Set to keep the session in the OS keychain instead of the storage file
const KEYRING_ENV: &str = "CARDDEMO_KEYRING";

/// Keychain service name for `KeyringStore`
const KEYRING_SERVICE: &str = "carddemo-client";

const USERNAME_ENV: &str = "CARDDEMO_USERNAME";
const PASSWORD_ENV: &str = "CARDDEMO_PASSWORD";

/// Path fetched once logged in
const ACCOUNTS_PATH: &str = "/accounts";

/// Initialize the tracing subscriber for logging
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "carddemo-client.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn read_credential() -> Result<Credential> {
    let username = match std::env::var(USERNAME_ENV) {
        Ok(name) if !name.trim().is_empty() => name,
        _ => {
            print!("Username: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let credential = Credential::new(username, password);
    if !credential.is_complete() {
        bail!("Username and password are required");
    }
    Ok(credential)
}

fn open_store() -> Result<Arc<dyn KeyValueStore>> {
    if std::env::var_os(KEYRING_ENV).is_some() {
        info!(service = KEYRING_SERVICE, "Using OS keychain for session storage");
        return Ok(Arc::new(KeyringStore::new(KEYRING_SERVICE)));
    }
    let path = ClientConfig::storage_path()?;
    info!(storage = %path.display(), "Using file session storage");
    Ok(Arc::new(FileStore::new(path)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    info!("CardDemo smoke run starting");

    let config = ClientConfig::load()?;
    info!(api = %config.api_base_url, "Configuration loaded");

    let ctx = ClientContext::new(config, open_store()?, Arc::new(SystemClock))?;

    ctx.signals.subscribe(SignalKind::SessionCleared, |signal| {
        if let Signal::SessionCleared { reason } = signal {
            warn!(reason = ?reason, "Session cleared, sign in again");
        }
    });

    if ctx.restore_session() && ctx.session.check_auth_status().await {
        println!("Reusing stored session");
    } else {
        let credential = read_credential()?;
        let session = ctx
            .session
            .login(&credential)
            .await
            .context("Login failed")?;
        println!("Logged in as {} until {}", session.user.username, session.expires_at);
    }

    if let Some(left) = ctx.session.time_until_expiry() {
        println!("Session valid for another {} minutes", left.num_minutes());
    }

    let gateway = ctx.gateway.clone();
    let accounts = ctx
        .errors
        .with_error_handling(|| gateway.get_json::<serde_json::Value>(ACCOUNTS_PATH), "load accounts")
        .await;
    match accounts {
        Ok(accounts) => {
            let count = accounts.as_array().map(Vec::len).unwrap_or(0);
            println!("Fetched {} accounts", count);
        }
        Err(e) => println!("Fetching accounts failed: {}", e),
    }

    for notification in ctx.notifications.list() {
        println!("{}", serde_json::to_string(&notification)?);
    }

    ctx.session.logout().await;
    println!("Logged out");
    Ok(())
}
