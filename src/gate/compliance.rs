//! Compliance policy: does the detected equipment satisfy the configured
//! requirement set?
//!
//! Labels are compared in a case-insensitive canonical form. An empty
//! requirement set is vacuously satisfied.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the required labels combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    /// Every required label must be detected.
    #[default]
    All,
    /// At least one required label must be detected.
    Any,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("ALL"),
            Self::Any => f.write_str("ANY"),
        }
    }
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "ANY" => Ok(Self::Any),
            other => Err(format!("unknown match mode: {other}")),
        }
    }
}

/// Required labels plus the match mode.
///
/// Labels keep their first-seen spelling for display; duplicates that differ
/// only by case or surrounding whitespace are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawComplianceConfig")]
pub struct ComplianceConfig {
    required: Vec<String>,
    mode: MatchMode,
}

#[derive(Deserialize)]
struct RawComplianceConfig {
    #[serde(default)]
    required: Vec<String>,
    #[serde(default)]
    mode: MatchMode,
}

impl From<RawComplianceConfig> for ComplianceConfig {
    fn from(raw: RawComplianceConfig) -> Self {
        Self::new(raw.required, raw.mode)
    }
}

impl ComplianceConfig {
    /// Build a config, normalizing and deduplicating the labels.
    pub fn new<I, S>(required: I, mode: MatchMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let required = required
            .into_iter()
            .map(Into::into)
            .map(|label| label.trim().to_owned())
            .filter(|label| !label.is_empty())
            .filter(|label| seen.insert(canonical(label)))
            .collect();
        Self { required, mode }
    }

    /// Required labels in configured order.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Match mode.
    pub fn mode(&self) -> MatchMode {
        self.mode
    }
}

/// Canonical comparison form of a label.
pub fn canonical(label: &str) -> String {
    label.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Whether `detected` satisfies `config`.
pub fn is_satisfied(detected: &[String], config: &ComplianceConfig) -> bool {
    if config.required.is_empty() {
        return true;
    }

    let detected = canonical_set(detected);
    let mut required = config.required.iter().map(|label| canonical(label));
    match config.mode {
        MatchMode::All => required.all(|label| detected.contains(&label)),
        MatchMode::Any => required.any(|label| detected.contains(&label)),
    }
}

/// Required labels absent from `detected`, in configured spelling.
pub fn missing_labels<'a>(detected: &[String], config: &'a ComplianceConfig) -> Vec<&'a str> {
    let detected = canonical_set(detected);
    config
        .required
        .iter()
        .filter(|label| !detected.contains(&canonical(label)))
        .map(String::as_str)
        .collect()
}

fn canonical_set(labels: &[String]) -> HashSet<String> {
    labels.iter().map(|label| canonical(label)).collect()
}
