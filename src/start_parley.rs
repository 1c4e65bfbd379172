//! Startup helpers for the terminal and HTTP front-ends.

use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::ParleyConfig;
use crate::llm::ModelDispatcher;
use crate::repl::Repl;
use crate::server::{self, AppState};
use crate::session::ChatService;
use crate::store::SqliteConversationStore;

fn env_filter() -> EnvFilter {
    filter_or_info(EnvFilter::try_from_default_env())
}

/// `RUST_LOG` wins when set and valid; otherwise fall back to `info`.
fn filter_or_info<E>(parsed: Result<EnvFilter, E>) -> EnvFilter {
    parsed.unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Load configuration from the environment and validate it.
///
/// # Errors
/// Returns an error if a variable is malformed or validation fails.
pub fn load_config() -> anyhow::Result<ParleyConfig> {
    let config = ParleyConfig::from_env().context("failed to read configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Open the store and build the dispatcher described by `config`.
///
/// # Errors
/// Returns an error if the database cannot be opened or the HTTP client
/// cannot be built.
pub fn build_service(config: &ParleyConfig) -> anyhow::Result<ChatService> {
    let store = SqliteConversationStore::open(&config.storage.sqlite_path).with_context(|| {
        format!(
            "failed to open conversation store at {}",
            config.storage.sqlite_path.display()
        )
    })?;
    let dispatcher =
        ModelDispatcher::from_config(&config.providers).context("failed to build HTTP client")?;
    info!(path = %config.storage.sqlite_path.display(), "Conversation store ready");
    Ok(ChatService::new(Box::new(store), dispatcher))
}

/// Run the HTTP server (used by the `parley-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address {}: {e}", config.server.host);
            return ExitCode::from(1);
        }
    };

    // The blocking HTTP client must be built and dropped outside the runtime.
    let state = match build_service(&config) {
        Ok(service) => AppState::new(service, config.default_model.clone()),
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
        }
        info!("Shutdown requested");
    };

    let result = rt.block_on(server::run_server_with_shutdown(
        Arc::clone(&state),
        addr,
        shutdown,
    ));
    drop(rt);

    // No single current conversation exists over HTTP, so empties are swept here.
    if let Err(e) = state.service.blocking_lock().discard_empty_conversations() {
        error!("Failed to discard empty conversations: {e}");
    }

    if let Err(e) = result {
        error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Run the terminal front-end (used by the `parley` binary).
///
/// Logs go to stderr so they never interleave with the conversation.
///
/// # Returns
/// `ExitCode::SUCCESS` when the session ends normally, `1` on failure.
#[must_use]
pub fn run_terminal() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let service = match build_service(&config) {
        Ok(service) => service,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let mut repl = Repl::new(&service, config.default_model.clone());
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    if let Err(e) = repl.run(stdin.lock(), &mut stdout) {
        error!("Terminal I/O failed: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
