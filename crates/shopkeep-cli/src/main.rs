//! Shopkeep - command-line client for the shopkeep retail-management API.
//!
//! Signs in, keeps the session alive across runs and exposes the domain
//! resources as plain JSON on stdout.

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shopkeep_core::{ApiError, Config};

use commands::Command;

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "shopkeep.log";

const USAGE: &str = "\
Usage: shopkeep <command> [args]

Commands:
  login [username] [--remember]   Sign in (password from SHOPKEEP_PASSWORD or prompt)
  logout                          End the session
  whoami                          Show the signed-in user's profile
  status                          Show the stored session without contacting the server
  list <resource> [page]          List a resource collection
  get <resource> <id>             Fetch one record
  open <path>                     Check where navigating to an app path leads

Resources: products, inventory, inventory-transactions, inventory-alerts,
           members, purchases, purchase-receivings, suppliers";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by RUST_LOG (default `warn`). With
/// `log_to_file` set, a daily-rolling file in the cache directory gets the
/// same events; the returned guard flushes it on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = config
        .log_to_file
        .then(|| config.cache_dir().ok())
        .flatten();
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(Some(command)) => command,
        Ok(None) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!(api_url = %config.api_url, storage = ?config.storage, "shopkeep starting");

    let store = config.open_session()?;
    let gateway = config.gateway(store)?;
    let result = commands::execute(command, &config, &gateway).await;
    debug!(ok = result.is_ok(), "Command finished");
    result
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<ApiError>() {
        Some(ApiError::LoginRequired(redirect)) => {
            eprintln!("Session ended, sign in again at {}", redirect.location());
            eprintln!("Run `shopkeep login` to sign in.");
            if let Some(ref path) = redirect.return_to {
                eprintln!("Then resume with `shopkeep open {}`.", path);
            }
        }
        _ => eprintln!("Error: {:#}", error),
    }
}
