//! Runtime configuration, one section per pipeline stage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::alert::LocationInfo;
use crate::confirmation::WindowConfig;
use crate::consensus::ConsensusConfig;
use crate::dispatch::channels::{CommandChannelConfig, WebhookChannelConfig};
use crate::escalation::EscalationConfig;
use crate::probes::AggregatorConfig;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level vigil configuration.
///
/// Every section falls back to its defaults, so a config file only needs
/// the values it changes. Channel lists are empty by default; the binary
/// adds a console channel when nothing else is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Durable alert record file.
    pub record_path: PathBuf,

    /// Redeliver records still pending from a previous run at startup.
    pub redeliver_on_start: bool,

    /// Fixed installation position attached to every alert. Absent means
    /// alerts carry no location.
    pub location: Option<LocationInfo>,

    /// Directory for evidence marker files. Absent disables evidence
    /// capture.
    pub evidence_dir: Option<PathBuf>,

    pub window: WindowConfig,
    pub aggregator: AggregatorConfig,
    pub consensus: ConsensusConfig,
    pub escalation: EscalationConfig,

    /// Webhook notification endpoints.
    pub webhooks: Vec<WebhookChannelConfig>,

    /// External command hooks, e.g. a local siren script or a dialer.
    pub commands: Vec<CommandChannelConfig>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            record_path: PathBuf::from("vigil-alerts.json"),
            redeliver_on_start: true,
            location: None,
            evidence_dir: None,
            window: WindowConfig::default(),
            aggregator: AggregatorConfig::default(),
            consensus: ConsensusConfig::default(),
            escalation: EscalationConfig::default(),
            webhooks: Vec::new(),
            commands: Vec::new(),
        }
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("VIGIL_RECORD_PATH") {
            config.record_path = PathBuf::from(path);
        }
        if let Ok(val) = std::env::var("VIGIL_REDELIVER_ON_START") {
            config.redeliver_on_start = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(secs) = std::env::var("VIGIL_WINDOW_SECONDS") {
            if let Ok(n) = secs.parse() {
                config.window.window_seconds = n;
            }
        }
        if let Ok(threshold) = std::env::var("VIGIL_AUTO_CONFIRM_THRESHOLD") {
            if let Ok(n) = threshold.parse() {
                config.aggregator.auto_confirm_threshold = n;
            }
        }
        if let Ok(val) = std::env::var("VIGIL_AUTO_CALL_ENABLED") {
            config.escalation.auto_call_enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(secs) = std::env::var("VIGIL_CEILING_SECONDS") {
            if let Ok(n) = secs.parse() {
                config.escalation.ceiling_s = n;
            }
        }

        config
    }
}
