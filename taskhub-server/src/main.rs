//! `TaskHub` server: real-time task collaboration and public share links.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin taskhub-server
//!
//! # Custom address, scoped group joins, file logging
//! cargo run --bin taskhub-server -- --bind 127.0.0.1:9100 --join-policy scoped --log-file /tmp/taskhub.log
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use taskhub_server::api::{self, AppState};
use taskhub_server::config::{HubCliArgs, HubConfig};
use taskhub_server::store::MemoryTaskStore;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Held until shutdown so buffered file output is flushed.
    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(
        addr = %config.bind_addr,
        join_policy = ?config.join_policy,
        heartbeat_secs = config.heartbeat().as_secs(),
        "starting taskhub server"
    );

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(Arc::new(MemoryTaskStore::new()), config));

    match api::start_server_with_state(&bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "taskhub server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}

/// Initializes tracing to stdout, or to `file_path` through a non-blocking
/// writer when one is given.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(|p| Some((p.parent()?, p.file_name()?)))
    else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();
    Some(guard)
}
