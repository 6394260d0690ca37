//! Turnstile CLI entry point.
//!
//! Provides `run`, `check-config`, and `decisions` subcommands for running
//! the gate, printing the effective configuration, or reading back the
//! audit log.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use turnstile::audit::jsonl::JsonlAuditLog;
use turnstile::audit::sqlite::SqliteAuditLog;
use turnstile::audit::{AuditSink, FanoutAudit};
use turnstile::cadence::budget::MonotonicClock;
use turnstile::cadence::{GateController, GateDeps};
use turnstile::config::{RuntimePaths, TurnstileConfig};
use turnstile::publisher::{GateEvent, StatusPublisher};
use turnstile::sensors::replay::{ReplayScript, ReplaySensors};
use turnstile::settings::{FileSettingsStore, SettingsProvider, SettingsStore};

/// How long to let the observer drain after the gate stops.
const OBSERVER_DRAIN: Duration = Duration::from_secs(1);

/// Turnstile — PPE and identity access gate.
#[derive(Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the gate until Ctrl-C. SIGHUP reloads live settings.
    Run {
        /// Service config file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Replay script to drive the collaborators.
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Print the effective service config and live gate settings.
    CheckConfig {
        /// Service config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the most recent access decisions as JSON lines.
    Decisions {
        /// Service config file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum number of records.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, replay } => handle_run(config.as_deref(), replay).await,
        Command::CheckConfig { config } => handle_check_config(config.as_deref()),
        Command::Decisions { config, limit } => handle_decisions(config.as_deref(), limit).await,
    }
}

/// Run the gate until interrupted.
async fn handle_run(config_path: Option<&Path>, replay: Option<PathBuf>) -> anyhow::Result<()> {
    let config = TurnstileConfig::load(config_path).context("failed to load configuration")?;
    let paths = config.paths()?;

    let _logging_guard = turnstile::logging::init_production(&paths.logs_dir)?;

    let replay_path = replay
        .or_else(|| paths.replay.clone())
        .context("no replay script configured; pass --replay or set [replay] path")?;
    let script = ReplayScript::load(&replay_path, config.replay.repeat)?;
    info!(path = %replay_path.display(), frames = script.len(), "replay script loaded");

    let store: Arc<dyn SettingsStore> = Arc::new(FileSettingsStore::new(&paths.settings));
    let settings = Arc::new(SettingsProvider::new(
        store,
        Duration::from_millis(config.settings.compliance_cache_ms),
    ));

    let audit = open_audit(&paths).await?;

    let (publisher, events) = StatusPublisher::channel(config.cadence.snapshot_channel_capacity);
    let observer = tokio::spawn(log_events(events));

    let controller = GateController::new(
        GateDeps {
            sensors: Arc::new(ReplaySensors::new(script)),
            settings,
            audit,
            publisher,
            clock: Arc::new(MonotonicClock::new()),
        },
        config.timings(),
        config.cadence(),
    );

    info!(
        settings = %paths.settings.display(),
        audit_db = %paths.audit_db.display(),
        "turnstile starting"
    );
    controller.start().await.context("failed to start gate")?;

    let waited = wait_for_shutdown(&controller).await;

    if !controller.stop().await {
        warn!("gate worker had to be aborted");
    }

    // Dropping the controller drops the last publisher handle.
    drop(controller);
    if tokio::time::timeout(OBSERVER_DRAIN, observer).await.is_err() {
        debug!("status observer still draining at exit");
    }

    info!("turnstile stopped");
    waited
}

/// Open the SQLite sink plus the optional JSONL sink.
async fn open_audit(paths: &RuntimePaths) -> anyhow::Result<Arc<dyn AuditSink>> {
    let sqlite = SqliteAuditLog::open(&paths.audit_db)
        .await
        .with_context(|| format!("failed to open audit log {}", paths.audit_db.display()))?;
    let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(sqlite)];

    if let Some(jsonl_path) = &paths.audit_jsonl {
        let jsonl = JsonlAuditLog::open(jsonl_path)
            .with_context(|| format!("failed to open audit file {}", jsonl_path.display()))?;
        sinks.push(Arc::new(jsonl));
    }

    if sinks.len() == 1 {
        if let Some(only) = sinks.pop() {
            return Ok(only);
        }
    }
    Ok(Arc::new(FanoutAudit::new(sinks)))
}

/// Log every event the gate publishes.
async fn log_events(mut events: mpsc::Receiver<GateEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            GateEvent::AccessStatusChange(status) => info!(
                state = %status.state,
                person = status.person_name.as_deref().unwrap_or("-"),
                message = %status.message,
                "gate status"
            ),
            GateEvent::DetectionUpdate(update) => debug!(
                labels = ?update.detected_labels,
                face = update.face_detected,
                "detections"
            ),
            GateEvent::FaceIdentified(face) => debug!(
                matched = face.matched,
                person_id = ?face.person_id,
                "face identified"
            ),
        }
    }
}

/// Block until Ctrl-C, reloading live settings on SIGHUP.
#[cfg(unix)]
async fn wait_for_shutdown(controller: &GateController) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                info!("received shutdown signal");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("received SIGHUP, reloading gate settings");
                controller.reload_config().await;
            }
        }
    }
}

/// Block until Ctrl-C.
#[cfg(not(unix))]
async fn wait_for_shutdown(_controller: &GateController) -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("received shutdown signal");
    Ok(())
}

/// Print the effective config, resolved paths, and live settings.
fn handle_check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    turnstile::logging::init_cli();

    let config = TurnstileConfig::load(config_path).context("failed to load configuration")?;
    let paths = config.paths()?;
    let settings = FileSettingsStore::new(&paths.settings)
        .load()
        .with_context(|| format!("invalid gate settings at {}", paths.settings.display()))?;

    let report = serde_json::json!({
        "config": config,
        "paths": paths,
        "settings": settings,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to render config")?
    );
    Ok(())
}

/// Print the newest audit records, most recent first.
async fn handle_decisions(config_path: Option<&Path>, limit: usize) -> anyhow::Result<()> {
    turnstile::logging::init_cli();

    let config = TurnstileConfig::load(config_path).context("failed to load configuration")?;
    let paths = config.paths()?;
    let log = SqliteAuditLog::open(&paths.audit_db)
        .await
        .with_context(|| format!("failed to open audit log {}", paths.audit_db.display()))?;

    for record in log.recent(limit).await? {
        println!(
            "{}",
            serde_json::to_string(&record).context("failed to render record")?
        );
    }
    Ok(())
}
