//! flagcache - operator console for the feature flag cache.
//!
//! Runs a `FlagService` against the configured authority and prints the
//! status table whenever it changes. One-shot modes print a single answer
//! and exit.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use flagcache_core::{
    Config, FlagClient, FlagService, FlagServiceConfig, FlagState, MonitorConfig, StatusMonitor,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "Usage:
  flagcache                        live status table (Ctrl-C to exit)
  flagcache --once                 print status once and exit
  flagcache --check <name>...      ask the authority about specific flags
  flagcache --user <user-id> <name>  evaluate one flag for a user";

enum Command {
    Watch,
    Once,
    Check(Vec<String>),
    User { user_id: String, name: String },
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.first().map(String::as_str) {
        None => Ok(Command::Watch),
        Some("--once") if args.len() == 1 => Ok(Command::Once),
        Some("--check") if args.len() > 1 => Ok(Command::Check(args[1..].to_vec())),
        Some("--user") if args.len() == 3 => Ok(Command::User {
            user_id: args[1].clone(),
            name: args[2].clone(),
        }),
        Some("--user") if args.len() == 2 => match Config::user_id_from_env() {
            Some(user_id) => Ok(Command::User {
                user_id,
                name: args[1].clone(),
            }),
            None => bail!("No user id given and FLAGCACHE_USER_ID is not set\n\n{}", USAGE),
        },
        Some(_) => bail!("{}", USAGE),
    }
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
fn init_tracing() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

fn build_client(config: &Config) -> Result<FlagClient> {
    let mut client = FlagClient::with_timeout(&config.base_url, config.request_timeout())?;
    match Config::token_from_env() {
        Some(token) => client.set_token(token),
        None => warn!("FLAGCACHE_TOKEN is not set, requests will be unauthenticated"),
    }
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    config.apply_env();
    info!(base_url = %config.base_url, "flagcache starting");

    let client = Arc::new(build_client(&config)?);

    match command {
        Command::Watch => watch(client, &config).await,
        Command::Once => once(client, &config).await,
        Command::Check(names) => check(client, &config, &names).await,
        Command::User { user_id, name } => check_user(client, &config, &user_id, &name).await,
    }
}

async fn watch(client: Arc<FlagClient>, config: &Config) -> Result<()> {
    let service = FlagService::start(client, config.service_config());
    let monitor = StatusMonitor::new(service.clone(), config.monitor_config());
    monitor.start();

    let mut reports = monitor.subscribe();
    println!("{}", monitor.render());

    loop {
        tokio::select! {
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let _ = reports.borrow_and_update();
                println!("{}", monitor.render());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    monitor.stop();
    service.shutdown();
    Ok(())
}

/// A service for one-shot commands: no timer, shut down by the caller.
fn one_shot_service(client: Arc<FlagClient>, config: &Config) -> FlagService {
    FlagService::start(
        client,
        FlagServiceConfig {
            auto_refresh: false,
            ..config.service_config()
        },
    )
}

async fn once(client: Arc<FlagClient>, config: &Config) -> Result<()> {
    let service = one_shot_service(client, config);
    let monitor = StatusMonitor::new(
        service.clone(),
        MonitorConfig {
            auto_refresh: false,
            ..config.monitor_config()
        },
    );

    // Joins the initial load started by `start`
    let result = service.refresh().await;
    print!("{}", monitor.render());
    service.shutdown();

    result.context("Feature flag refresh failed")
}

async fn check(client: Arc<FlagClient>, config: &Config, names: &[String]) -> Result<()> {
    let service = one_shot_service(client, config);
    let lines = check_lines(&service, names).await;
    service.shutdown();

    for line in lines? {
        println!("{}", line);
    }
    Ok(())
}

/// One `name: state` line per requested flag, in request order.
async fn check_lines(service: &FlagService, names: &[String]) -> Result<Vec<String>> {
    let states = service
        .check_remote(names)
        .await
        .context("Failed to check feature flags")?;

    Ok(names
        .iter()
        .map(|name| {
            let state = states.get(name).copied().unwrap_or(FlagState::Unknown);
            format!("{}: {}", name, state.as_str())
        })
        .collect())
}

async fn check_user(
    client: Arc<FlagClient>,
    config: &Config,
    user_id: &str,
    name: &str,
) -> Result<()> {
    let service = one_shot_service(client, config);
    let line = user_line(&service, user_id, name).await;
    service.shutdown();

    println!("{}", line?);
    Ok(())
}

async fn user_line(service: &FlagService, user_id: &str, name: &str) -> Result<String> {
    let enabled = service
        .check_for_user(name, user_id)
        .await
        .with_context(|| format!("Failed to evaluate {} for user {}", name, user_id))?;
    Ok(format!(
        "{} for user {}: {}",
        name,
        user_id,
        if enabled { "enabled" } else { "disabled" }
    ))
}
