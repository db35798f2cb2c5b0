//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Daemon configuration model, loading and validation."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_tick_hz() -> f64 {
    1.0
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_evaluation_grace() -> Duration {
    Duration::from_secs(60)
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Primary configuration object for the pumpwatch daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "PUMPWATCH_CONFIG";
    pub const ENV_TICK_HZ: &'static str = "PUMPWATCH_TICK_HZ";
    pub const ENV_ARCHIVE_DIR: &'static str = "PUMPWATCH_ARCHIVE_DIR";
    pub const ENV_API_LISTEN: &'static str = "PUMPWATCH_API_LISTEN";

    /// Load configuration from the first existing candidate, respecting the
    /// `PUMPWATCH_CONFIG` override and `PUMPWATCH_*` value overrides.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        let lookup = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let source = match lookup(Self::ENV_CONFIG_PATH) {
            Some(env_path) => Some(PathBuf::from(env_path)),
            None => candidates
                .iter()
                .map(|c| c.as_ref().to_path_buf())
                .find(|c| c.exists()),
        };

        let mut config = match &source {
            Some(path) => Self::read_file(path)?,
            None => {
                debug!("no configuration file found, using defaults");
                AppConfig::default()
            }
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(LoadedAppConfig { config, source })
    }

    fn read_file(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply `PUMPWATCH_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(Self::ENV_TICK_HZ) {
            self.simulation.tick_hz = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number, got '{raw}'", Self::ENV_TICK_HZ))?;
        }
        if let Some(raw) = lookup(Self::ENV_ARCHIVE_DIR) {
            self.bus.archive_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup(Self::ENV_API_LISTEN) {
            self.api.listen = raw.trim().parse().with_context(|| {
                format!("{} must be a socket address, got '{raw}'", Self::ENV_API_LISTEN)
            })?;
        }
        Ok(())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        if self.api.enabled && self.metrics.enabled && self.api.listen == self.metrics.listen {
            return Err(anyhow!(
                "api and metrics cannot share listen address {}",
                self.api.listen
            ));
        }
        if self.detection.cooldown.is_zero() {
            debug!("detection cooldown disabled");
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    /// Filter used when neither `PUMPWATCH_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: true,
            level: default_log_level(),
        }
    }
}

/// Message bus wiring. The in-memory transport is always present; the JSONL
/// archive is the local fallback record of everything published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_true")]
    pub archive_enabled: bool,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            archive_enabled: true,
            archive_dir: default_archive_dir(),
        }
    }
}

/// How the ground-truth label is chosen when several faults are active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Highest current severity wins; ties go to the earliest onset.
    #[default]
    HighestSeverity,
    /// The fault that started first wins regardless of severity.
    EarliestOnset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f64,
    #[serde(default)]
    pub label_policy: LabelPolicy,
    /// Scenario documents loaded into the registry at daemon start.
    #[serde(default)]
    pub scenario_files: Vec<PathBuf>,
    #[serde(default)]
    pub autostart: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            label_policy: LabelPolicy::default(),
            scenario_files: Vec::new(),
            autostart: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.tick_hz.is_finite() || self.tick_hz <= 0.0 || self.tick_hz > 1000.0 {
            return Err(anyhow!(
                "simulation.tick_hz must be within (0, 1000], got {}",
                self.tick_hz
            ));
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        crate::time::period_from_hz(self.tick_hz)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detector rule file; built-in defaults apply when unset.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    #[serde(default = "default_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
    #[serde(default = "default_evaluation_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub evaluation_grace: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            cooldown: default_cooldown(),
            evaluation_grace: default_evaluation_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
        }
    }
}
