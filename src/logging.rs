//! Tracing setup for the gate binary.
//!
//! The decision path logs with structured fields rather than formatted
//! text: `from`/`to` on every state transition, `reason` on each denial,
//! `occupants` on the multi-person override, `missing` and `mode` when the
//! equipment check times out, and `record_id` on audit writes. The long-running
//! `run` command keeps those fields as JSON in a daily file next to a
//! readable stderr stream ([`init_production`]). The one-shot commands only
//! need stderr ([`init_cli`]).

use std::path::Path;

use anyhow::Context;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Base file name for the rotating JSON log.
pub const LOG_FILE_NAME: &str = "turnstile.log";

/// Keeps the background file writer alive for the lifetime of `run`.
///
/// Drop it only after the controller has stopped, or the final release and
/// decision lines may be lost.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// One JSON object per event, with the structured fields under `fields`.
pub fn json_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer().json().with_writer(writer)
}

/// Log gate activity to `{logs_dir}/turnstile.log.YYYY-MM-DD` and stderr.
///
/// `RUST_LOG` filters both outputs. At the default `info` level the file
/// holds every transition and decision; `debug` adds per-cycle detail such
/// as abandoned attempts and skipped cache writes.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer(non_blocking))
        .with(console_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Stderr logging for `check-config` and `decisions`.
pub fn init_cli() {
    // Keep any subscriber already installed by an embedding process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}
