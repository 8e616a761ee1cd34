//! Simulation and scenario configuration.
//!
//! Scenarios are YAML files:
//!
//! ```yaml
//! simulation:
//!   random_seed: 42
//!   delay_ms: 0
//! medium:
//!   kind: unit_disk
//!   range_m: 50.0
//! motes:
//!   - id: 1
//!     position: { x: 0.0, y: 0.0 }
//!     behavior: { type: beacon, period_ms: 100 }
//!   - id: 2
//!     position: { x: 10.0, y: 0.0 }
//!     behavior: { type: byte_mote, chip: cc2420 }
//! ```

use motesim_common::{MoteId, Position};
use motesim_frame::{FrameError, FrameLayout};
use motesim_radio::{ChipKind, ChipModel, MediumConfig, PolicyError, StalledDelivery};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default seed for startup delays.
pub const DEFAULT_RANDOM_SEED: u64 = 123_456;

/// Default upper bound for the random mote startup delay.
pub const DEFAULT_MAX_STARTUP_DELAY_MS: u64 = 1000;

// ============================================================================
// Errors
// ============================================================================

/// Errors loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The YAML did not parse.
    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The scenario is inconsistent.
    #[error("Invalid scenario: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid-scenario error.
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The simulation stopped on a fatal error.
    #[error(transparent)]
    Simulation(#[from] motesim_common::SimError),

    /// The medium config was rejected.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// A mote's frame layout was rejected.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Thread or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The scheduler thread panicked.
    #[error("Scheduler thread panicked")]
    SchedulerPanicked,
}

// ============================================================================
// Simulation
// ============================================================================

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for every random draw the engine makes.
    pub random_seed: u64,
    /// Upper bound of the random startup delay given to each added mote.
    /// Zero starts every mote at once.
    pub max_mote_startup_delay_ms: u64,
    /// Wall-clock sleep per simulated millisecond. Zero runs free.
    pub delay_ms: u64,
    /// Report events that take longer than this. `None` disables the watchdog.
    pub watchdog_timeout_ms: Option<u64>,
    /// Log progress every this many wall-clock seconds.
    pub periodic_stats_interval_secs: Option<u64>,
    /// Trace spec for per-mote tracing (`"mote:3,beacon-1"`, `"*"`).
    pub trace: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            random_seed: DEFAULT_RANDOM_SEED,
            max_mote_startup_delay_ms: DEFAULT_MAX_STARTUP_DELAY_MS,
            delay_ms: 0,
            watchdog_timeout_ms: Some(5000),
            periodic_stats_interval_secs: None,
            trace: None,
        }
    }
}

impl SimulationConfig {
    /// Settings that start every mote at time zero and never sleep.
    pub fn immediate() -> Self {
        SimulationConfig {
            max_mote_startup_delay_ms: 0,
            watchdog_timeout_ms: None,
            ..Default::default()
        }
    }

    /// Replace the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}

// ============================================================================
// Scenario
// ============================================================================

fn default_payload_len() -> usize {
    10
}

/// What a scenario mote does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MoteBehavior {
    /// Coarse mote with a packet radio sending a beacon every `period_ms`.
    Beacon {
        /// Beacon period.
        period_ms: u64,
        /// First beacon time.
        #[serde(default)]
        offset_ms: u64,
        /// Beacon size.
        #[serde(default = "default_payload_len")]
        payload_len: usize,
    },
    /// Coarse mote with a packet radio that only listens.
    Listener,
    /// Fine mote driving an emulated chip byte by byte.
    ByteMote {
        /// Which chip.
        chip: ChipKind,
        /// Send a frame every `period_ms`; `None` only listens.
        #[serde(default)]
        period_ms: Option<u64>,
        /// First send time.
        #[serde(default)]
        offset_ms: u64,
        /// Frame payload size.
        #[serde(default = "default_payload_len")]
        payload_len: usize,
        /// Stalled inbound frame handling.
        #[serde(default)]
        stalled: StalledDelivery,
        /// Override the chip's default channel.
        #[serde(default)]
        channel: Option<u8>,
    },
}

impl MoteBehavior {
    fn max_payload(&self) -> Option<(usize, usize)> {
        match self {
            MoteBehavior::Beacon { payload_len, .. } => Some((
                *payload_len,
                FrameLayout::cc2420().effective_max_payload(),
            )),
            MoteBehavior::ByteMote {
                chip,
                period_ms: Some(_),
                payload_len,
                ..
            } => Some((
                *payload_len,
                ChipModel::for_kind(*chip).layout.effective_max_payload(),
            )),
            _ => None,
        }
    }
}

/// One mote of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoteConfig {
    /// Unique ID.
    pub id: u32,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Position in meters.
    #[serde(default)]
    pub position: Position,
    /// Behavior.
    pub behavior: MoteBehavior,
}

impl MoteConfig {
    /// The mote's ID.
    pub fn mote_id(&self) -> MoteId {
        MoteId::new(self.id)
    }
}

/// A complete scenario.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Engine settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Radio medium.
    #[serde(default)]
    pub medium: MediumConfig,
    /// Motes, in registration order.
    #[serde(default)]
    pub motes: Vec<MoteConfig>,
}

impl ScenarioConfig {
    /// Parse and validate a YAML scenario.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ScenarioConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML scenario file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check IDs, periods and payload sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for mote in &self.motes {
            if !seen.insert(mote.id) {
                return Err(ConfigError::invalid(format!("duplicate mote id {}", mote.id)));
            }
            let period = match &mote.behavior {
                MoteBehavior::Beacon { period_ms, .. } => Some(*period_ms),
                MoteBehavior::ByteMote { period_ms, .. } => *period_ms,
                MoteBehavior::Listener => None,
            };
            if period == Some(0) {
                return Err(ConfigError::invalid(format!(
                    "mote {} has a zero send period",
                    mote.id
                )));
            }
            if let Some((len, max)) = mote.behavior.max_payload() {
                if len == 0 || len > max {
                    return Err(ConfigError::invalid(format!(
                        "mote {} payload_len {} outside 1..={}",
                        mote.id, len, max
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
simulation:
  random_seed: 7
medium:
  kind: full_mesh
motes:
  - id: 1
    name: beacon-1
    position: { x: 1.0, y: 2.0 }
    behavior: { type: beacon, period_ms: 50 }
  - id: 2
    behavior:
      type: byte_mote
      chip: tr1001
      stalled: { policy: drop_after, ticks: 3 }
  - id: 3
    behavior: { type: listener }
"#;

    #[test]
    fn test_parse_scenario() {
        let config = ScenarioConfig::from_yaml_str(SCENARIO).unwrap();
        assert_eq!(config.simulation.random_seed, 7);
        assert_eq!(
            config.simulation.max_mote_startup_delay_ms,
            DEFAULT_MAX_STARTUP_DELAY_MS
        );
        assert_eq!(config.medium, MediumConfig::FullMesh);
        assert_eq!(config.motes.len(), 3);
        assert_eq!(config.motes[0].name.as_deref(), Some("beacon-1"));
        assert_eq!(
            config.motes[0].behavior,
            MoteBehavior::Beacon {
                period_ms: 50,
                offset_ms: 0,
                payload_len: 10
            }
        );
        match &config.motes[1].behavior {
            MoteBehavior::ByteMote {
                chip,
                period_ms,
                stalled,
                ..
            } => {
                assert_eq!(*chip, ChipKind::Tr1001);
                assert_eq!(*period_ms, None);
                assert_eq!(*stalled, StalledDelivery::DropAfter { ticks: 3 });
            }
            other => panic!("unexpected behavior {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = ScenarioConfig::from_yaml_str("motes: []").unwrap();
        assert_eq!(config.simulation, SimulationConfig::default());
        assert_eq!(config.simulation.random_seed, 123_456);
        assert_eq!(config.medium, MediumConfig::default());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let yaml = r#"
motes:
  - { id: 1, behavior: { type: listener } }
  - { id: 1, behavior: { type: listener } }
"#;
        assert!(matches!(
            ScenarioConfig::from_yaml_str(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_bad_payload_and_period() {
        let oversized = r#"
motes:
  - { id: 1, behavior: { type: beacon, period_ms: 10, payload_len: 500 } }
"#;
        assert!(ScenarioConfig::from_yaml_str(oversized).is_err());

        let zero_period = r#"
motes:
  - { id: 1, behavior: { type: byte_mote, chip: cc2420, period_ms: 0 } }
"#;
        assert!(ScenarioConfig::from_yaml_str(zero_period).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ScenarioConfig::load("/nonexistent/scenario.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
