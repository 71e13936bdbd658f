//! Engine configuration.
//!
//! Milestone thresholds and the propagation cadence are deployment
//! parameters, not fixed contracts. The short propagation default matches
//! the staging cadence; production deployments override it in the TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use journey_tracker_lib::milestone::MilestoneKind;
use serde::Deserialize;

use crate::{DEFAULT_DATA_DIR, TrackerError};

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Directory holding the session slot and traveled-path logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Foreground sampling cadence, seconds.
    #[serde(default = "default_foreground_interval")]
    pub foreground_interval_secs: u64,

    /// Background sampling cadence, seconds. Handed to the OS scheduler.
    #[serde(default = "default_background_interval")]
    pub background_interval_secs: u64,

    /// Minimum gap between outbound numeric progress updates, seconds.
    #[serde(default = "default_propagation_interval")]
    pub propagation_interval_secs: u64,

    /// Minimum displacement before a fix joins the traveled-path polyline.
    #[serde(default = "default_min_displacement")]
    pub min_displacement_meters: f64,

    /// ETA fallback when a fix carries no usable speed, km/h.
    #[serde(default = "default_speed_kmh")]
    pub default_speed_kmh: f64,

    /// Wait after a failed fix acquisition before the next attempt, seconds.
    #[serde(default = "default_retry_backoff")]
    pub provider_retry_backoff_secs: u64,

    #[serde(default = "default_milestones")]
    pub milestones: Vec<MilestoneThreshold>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneThreshold {
    pub percent: f64,
    pub kind: MilestoneKind,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            foreground_interval_secs: default_foreground_interval(),
            background_interval_secs: default_background_interval(),
            propagation_interval_secs: default_propagation_interval(),
            min_displacement_meters: default_min_displacement(),
            default_speed_kmh: default_speed_kmh(),
            provider_retry_backoff_secs: default_retry_backoff(),
            milestones: default_milestones(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_foreground_interval() -> u64 {
    5
}

fn default_background_interval() -> u64 {
    300
}

fn default_propagation_interval() -> u64 {
    5
}

fn default_min_displacement() -> f64 {
    25.0
}

fn default_speed_kmh() -> f64 {
    60.0
}

fn default_retry_backoff() -> u64 {
    10
}

/// `picked_up` is not mapped to a threshold; operators fire it manually.
fn default_milestones() -> Vec<MilestoneThreshold> {
    vec![
        MilestoneThreshold { percent: 1.0, kind: MilestoneKind::Departed },
        MilestoneThreshold { percent: 25.0, kind: MilestoneKind::Checkpoint },
        MilestoneThreshold { percent: 50.0, kind: MilestoneKind::FuelStop },
        MilestoneThreshold { percent: 90.0, kind: MilestoneKind::Arriving },
        MilestoneThreshold { percent: 100.0, kind: MilestoneKind::Delivered },
    ]
}

impl TrackerConfig {
    /// Loads the config file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self, TrackerError> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self, TrackerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| TrackerError::Config(format!("failed to read config file {:?}: {}", path, err)))?;

        let config: TrackerConfig = toml::from_str(&content)
            .map_err(|err| TrackerError::Config(format!("failed to parse config: {}", err)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.foreground_interval_secs == 0 || self.background_interval_secs == 0 {
            return Err(TrackerError::Config("sampling intervals must be positive".to_string()));
        }
        if self.default_speed_kmh <= 0.0 {
            return Err(TrackerError::Config("default_speed_kmh must be positive".to_string()));
        }
        if self.min_displacement_meters < 0.0 {
            return Err(TrackerError::Config("min_displacement_meters must not be negative".to_string()));
        }
        for threshold in &self.milestones {
            if !(0.0..=100.0).contains(&threshold.percent) {
                return Err(TrackerError::Config(format!(
                    "milestone threshold for {} is outside 0-100: {}",
                    threshold.kind, threshold.percent
                )));
            }
        }
        // One event per kind per journey; a duplicate kind would break that.
        for (i, threshold) in self.milestones.iter().enumerate() {
            if self.milestones[..i].iter().any(|other| other.kind == threshold.kind) {
                return Err(TrackerError::Config(format!(
                    "milestone kind {} is mapped to more than one threshold",
                    threshold.kind
                )));
            }
        }
        Ok(())
    }

    pub fn foreground_interval(&self) -> Duration {
        Duration::from_secs(self.foreground_interval_secs)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs)
    }

    pub fn propagation_interval(&self) -> Duration {
        Duration::from_secs(self.propagation_interval_secs)
    }

    pub fn provider_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.provider_retry_backoff_secs)
    }
}
