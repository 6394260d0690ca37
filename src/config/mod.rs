//! Service configuration loading.
//!
//! Loads `./turnstile.toml` (or `--config`, or `$TURNSTILE_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.
//!
//! This is the static, operator-owned layer. The live gate settings that an
//! admin edits while the gate runs live in [`crate::settings`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cadence::budget::CycleBudget;
use crate::cadence::CadenceSettings;
use crate::gate::engine::GateTimings;

const CONFIG_PATH_ENV: &str = "TURNSTILE_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "turnstile.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level service configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnstileConfig {
    /// Decision engine timeouts (`[gate]`).
    pub gate: GateConfig,
    /// Worker scheduling (`[cadence]`).
    pub cadence: CadenceConfig,
    /// Live settings store (`[settings]`).
    pub settings: SettingsConfig,
    /// Decision record sinks (`[audit]`).
    pub audit: AuditConfig,
    /// Scripted collaborator input (`[replay]`).
    pub replay: ReplayConfig,
    /// Log output (`[logging]`).
    pub logging: LoggingConfig,
}

impl TurnstileConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `explicit` (from `--config`) wins over `$TURNSTILE_CONFIG_PATH`.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("TURNSTILE_FPS") {
            match v.parse() {
                Ok(n) => self.cadence.fps = n,
                Err(_) => tracing::warn!(
                    var = "TURNSTILE_FPS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("TURNSTILE_SETTINGS_PATH") {
            self.settings.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TURNSTILE_AUDIT_DB") {
            self.audit.sqlite_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TURNSTILE_REPLAY_PATH") {
            self.replay.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("TURNSTILE_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or mistyped fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Decision engine timeouts.
    pub fn timings(&self) -> GateTimings {
        GateTimings {
            face_timeout: Duration::from_secs(self.gate.face_timeout_secs),
            ppe_timeout: Duration::from_secs(self.gate.ppe_timeout_secs),
            display_duration: Duration::from_secs(self.gate.display_secs),
        }
    }

    /// Worker scheduling parameters.
    pub fn cadence(&self) -> CadenceSettings {
        CadenceSettings {
            budget: CycleBudget::from_fps(self.cadence.fps),
            stop_timeout: Duration::from_millis(self.cadence.stop_timeout_ms),
            error_backoff: Duration::from_millis(self.cadence.error_backoff_ms),
        }
    }

    /// Resolve file locations against the default data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn paths(&self) -> Result<RuntimePaths> {
        Ok(self.paths_in(&data_dir()?))
    }

    /// Resolve file locations against `data_dir`. Explicit paths win.
    pub fn paths_in(&self, data_dir: &Path) -> RuntimePaths {
        let or_default = |explicit: &Option<PathBuf>, name: &str| {
            explicit.clone().unwrap_or_else(|| data_dir.join(name))
        };
        RuntimePaths {
            data_dir: data_dir.to_path_buf(),
            settings: or_default(&self.settings.path, "settings.toml"),
            audit_db: or_default(&self.audit.sqlite_path, "access_log.db"),
            audit_jsonl: self.audit.jsonl_path.clone(),
            logs_dir: or_default(&self.logging.dir, "logs"),
            replay: self.replay.path.clone(),
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// Decision engine timeouts, whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// How long to wait for a recognized face.
    pub face_timeout_secs: u64,
    /// How long to wait for compliant equipment.
    pub ppe_timeout_secs: u64,
    /// How long a grant or denial stays on display.
    pub display_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            face_timeout_secs: 5,
            ppe_timeout_secs: 3,
            display_secs: 5,
        }
    }
}

/// Worker scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Target cycles per second.
    pub fps: u32,
    /// Bounded wait for the worker on stop.
    pub stop_timeout_ms: u64,
    /// Pause after a failed cycle.
    pub error_backoff_ms: u64,
    /// Capacity of the status event channel.
    pub snapshot_channel_capacity: usize,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            stop_timeout_ms: 2000,
            error_backoff_ms: 100,
            snapshot_channel_capacity: 64,
        }
    }
}

/// Live settings store location and caching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Settings file. Defaults to `settings.toml` in the data dir.
    pub path: Option<PathBuf>,
    /// How long a compliance read stays fresh. Zero re-reads on every check.
    pub compliance_cache_ms: u64,
}

/// Decision record sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// SQLite database. Defaults to `access_log.db` in the data dir.
    pub sqlite_path: Option<PathBuf>,
    /// Optional secondary JSON-lines sink.
    pub jsonl_path: Option<PathBuf>,
}

/// Scripted collaborator input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// JSONL replay script.
    pub path: Option<PathBuf>,
    /// Wrap around at the end of the script.
    pub repeat: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            path: None,
            repeat: true,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log directory. Defaults to `logs` in the data dir.
    pub dir: Option<PathBuf>,
}

// ── Paths ───────────────────────────────────────────────────────

/// Fully resolved file locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimePaths {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Live settings file.
    pub settings: PathBuf,
    /// SQLite audit database.
    pub audit_db: PathBuf,
    /// Optional JSONL audit file.
    pub audit_jsonl: Option<PathBuf>,
    /// Log directory.
    pub logs_dir: PathBuf,
    /// Replay script, if configured.
    pub replay: Option<PathBuf>,
}

/// Resolve the default data directory (`~/.turnstile/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn data_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".turnstile"))
}

// ── Tests ───────────────────────────────────────────────────────
