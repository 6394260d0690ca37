//! Live gate settings: the identity-check toggle and the compliance policy.
//!
//! Settings are admin-editable while the gate runs, so they are read through
//! a [`SettingsStore`] rather than held in the static service config. The
//! [`SettingsProvider`] adds a short-lived cache with explicit invalidation
//! and falls back to safe defaults whenever the store cannot be read.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gate::compliance::ComplianceConfig;

/// Admin-editable gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSettings {
    /// Whether a face match is required before the equipment check.
    #[serde(default = "default_identity_check")]
    pub identity_check_enabled: bool,

    /// Required equipment and how it combines.
    #[serde(default)]
    pub compliance: ComplianceConfig,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            identity_check_enabled: default_identity_check(),
            compliance: ComplianceConfig::default(),
        }
    }
}

fn default_identity_check() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Source of live gate settings.
pub trait SettingsStore: Send + Sync {
    /// Read the current settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unreachable or malformed.
    fn load(&self) -> anyhow::Result<GateSettings>;
}

/// Settings read from a TOML file on every load.
///
/// A missing file means nothing has been configured yet and yields defaults.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> anyhow::Result<GateSettings> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse settings at {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                Ok(GateSettings::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read settings at {}: {e}",
                self.path.display()
            )),
        }
    }
}

/// In-memory settings, updated through [`MemorySettingsStore::replace`].
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: RwLock<GateSettings>,
}

impl MemorySettingsStore {
    /// Store holding `settings`.
    pub fn new(settings: GateSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Swap in new settings.
    pub fn replace(&self, settings: GateSettings) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> anyhow::Result<GateSettings> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Where the decision engine gets its compliance policy.
///
/// Implementations must return fresh data after [`invalidate`](Self::invalidate)
/// and must never fail: an unreadable source yields the default policy.
pub trait ComplianceConfigProvider: Send + Sync {
    /// Policy to evaluate the current check against.
    fn current(&self) -> ComplianceConfig;

    /// Drop any cached policy so the next call re-reads the source.
    fn invalidate(&self);
}

/// Settings reader with a bounded-age compliance cache.
///
/// With a zero TTL every [`current`](ComplianceConfigProvider::current) call
/// goes to the store. Failed reads are never cached.
pub struct SettingsProvider {
    store: Arc<dyn SettingsStore>,
    ttl: Duration,
    cache: Mutex<PolicyCache>,
}

/// Cached policy plus an invalidation counter.
///
/// The lock is never held across a store read. A read that started before
/// an `invalidate` sees a newer generation on return and is not cached.
#[derive(Default)]
struct PolicyCache {
    entry: Option<(ComplianceConfig, Instant)>,
    generation: u64,
}

impl SettingsProvider {
    /// Provider over `store` caching compliance reads for `ttl`.
    pub fn new(store: Arc<dyn SettingsStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(PolicyCache::default()),
        }
    }

    /// Identity-check toggle, read fresh. Defaults to enabled if unreadable.
    pub fn identity_check_enabled(&self) -> bool {
        match self.store.load() {
            Ok(settings) => settings.identity_check_enabled,
            Err(e) => {
                warn!(error = %e, "settings unavailable, identity check stays enabled");
                default_identity_check()
            }
        }
    }

    /// Full settings, falling back to defaults if unreadable.
    pub fn settings(&self) -> GateSettings {
        self.store.load().unwrap_or_else(|e| {
            warn!(error = %e, "settings unavailable, using defaults");
            GateSettings::default()
        })
    }
}

impl SettingsProvider {
    fn lock_cache(&self) -> MutexGuard<'_, PolicyCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ComplianceConfigProvider for SettingsProvider {
    fn current(&self) -> ComplianceConfig {
        let generation = {
            let cache = self.lock_cache();
            if let Some((config, cached_at)) = cache.entry.as_ref() {
                if cached_at.elapsed() < self.ttl {
                    return config.clone();
                }
            }
            cache.generation
        };

        match self.store.load() {
            Ok(settings) => {
                let mut cache = self.lock_cache();
                if cache.generation == generation {
                    cache.entry = Some((settings.compliance.clone(), Instant::now()));
                } else {
                    debug!("settings invalidated during read, result not cached");
                }
                settings.compliance
            }
            Err(e) => {
                warn!(error = %e, "compliance settings unavailable, using empty ALL policy");
                self.lock_cache().entry = None;
                ComplianceConfig::default()
            }
        }
    }

    fn invalidate(&self) {
        let mut cache = self.lock_cache();
        cache.entry = None;
        cache.generation = cache.generation.wrapping_add(1);
    }
}
