//! Connectivity policies.
//!
//! A policy answers one question: can a transmission from one registered
//! radio reach another? Interference, channel matching and delivery are the
//! medium's job. Policies are picked from a [`MediumConfig`] through
//! [`build_policy`].

use motesim_common::{MoteId, Position};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Default unit-disk transmission range in meters.
pub const DEFAULT_TRANSMISSION_RANGE_M: f64 = 50.0;

/// A registered radio as seen by a policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioNode {
    /// Owning mote.
    pub mote: MoteId,
    /// Position of the mote.
    pub position: Position,
}

/// Decides which radios a transmission reaches.
pub trait ConnectivityPolicy: Send {
    /// Which medium this is.
    fn kind(&self) -> MediumKind;

    /// Whether `destination` hears `source`.
    fn can_reach(&self, source: &RadioNode, destination: &RadioNode) -> bool;
}

// ============================================================================
// Policies
// ============================================================================

/// Unit-disk graph: every radio within `range_m` hears the sender.
#[derive(Debug, Clone)]
pub struct UnitDisk {
    range_m: f64,
}

impl UnitDisk {
    /// Create a unit-disk policy.
    pub fn new(range_m: f64) -> Result<Self, PolicyError> {
        if !range_m.is_finite() || range_m < 0.0 {
            return Err(PolicyError::InvalidRange(range_m));
        }
        Ok(UnitDisk { range_m })
    }

    /// Transmission range in meters.
    pub fn range_m(&self) -> f64 {
        self.range_m
    }
}

impl ConnectivityPolicy for UnitDisk {
    fn kind(&self) -> MediumKind {
        MediumKind::UnitDisk
    }

    fn can_reach(&self, source: &RadioNode, destination: &RadioNode) -> bool {
        source.position.distance_to(&destination.position) <= self.range_m
    }
}

/// Everyone hears everyone.
#[derive(Debug, Clone, Default)]
pub struct FullMesh;

impl ConnectivityPolicy for FullMesh {
    fn kind(&self) -> MediumKind {
        MediumKind::FullMesh
    }

    fn can_reach(&self, _source: &RadioNode, _destination: &RadioNode) -> bool {
        true
    }
}

/// Explicit directed links.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: HashSet<(MoteId, MoteId)>,
}

impl LinkTable {
    /// Create a table from directed `(from, to)` pairs.
    pub fn new(links: impl IntoIterator<Item = (MoteId, MoteId)>) -> Self {
        LinkTable {
            links: links.into_iter().collect(),
        }
    }

    /// Add a directed link.
    pub fn add_link(&mut self, from: MoteId, to: MoteId) {
        self.links.insert((from, to));
    }

    /// Number of directed links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the table has no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl ConnectivityPolicy for LinkTable {
    fn kind(&self) -> MediumKind {
        MediumKind::LinkTable
    }

    fn can_reach(&self, source: &RadioNode, destination: &RadioNode) -> bool {
        self.links.contains(&(source.mote, destination.mote))
    }
}

/// A medium where nothing is ever heard.
#[derive(Debug, Clone, Default)]
pub struct Silent;

impl ConnectivityPolicy for Silent {
    fn kind(&self) -> MediumKind {
        MediumKind::Silent
    }

    fn can_reach(&self, _source: &RadioNode, _destination: &RadioNode) -> bool {
        false
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Available media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediumKind {
    /// Distance-limited unit-disk graph.
    UnitDisk,
    /// Full connectivity.
    FullMesh,
    /// Explicit directed links.
    LinkTable,
    /// No connectivity.
    Silent,
}

/// A directed link in a [`MediumConfig::LinkTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Sender.
    pub from: MoteId,
    /// Receiver.
    pub to: MoteId,
    /// Also add the reverse link.
    #[serde(default)]
    pub bidirectional: bool,
}

/// Medium selection as it appears in configuration files.
///
/// ```yaml
/// medium:
///   kind: unit_disk
///   range_m: 40.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediumConfig {
    /// Unit-disk graph.
    UnitDisk {
        /// Transmission range in meters.
        #[serde(default = "default_range")]
        range_m: f64,
    },
    /// Full connectivity.
    FullMesh,
    /// Explicit directed links.
    LinkTable {
        /// Links.
        #[serde(default)]
        links: Vec<LinkConfig>,
    },
    /// No connectivity.
    Silent,
}

fn default_range() -> f64 {
    DEFAULT_TRANSMISSION_RANGE_M
}

impl MediumConfig {
    /// Which medium this selects.
    pub fn kind(&self) -> MediumKind {
        match self {
            MediumConfig::UnitDisk { .. } => MediumKind::UnitDisk,
            MediumConfig::FullMesh => MediumKind::FullMesh,
            MediumConfig::LinkTable { .. } => MediumKind::LinkTable,
            MediumConfig::Silent => MediumKind::Silent,
        }
    }
}

impl Default for MediumConfig {
    fn default() -> Self {
        MediumConfig::UnitDisk {
            range_m: DEFAULT_TRANSMISSION_RANGE_M,
        }
    }
}

/// Errors building a policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Range is negative or not a number.
    #[error("Invalid transmission range: {0}")]
    InvalidRange(f64),
}

/// Build the policy a config selects.
pub fn build_policy(config: &MediumConfig) -> Result<Box<dyn ConnectivityPolicy>, PolicyError> {
    Ok(match config {
        MediumConfig::UnitDisk { range_m } => Box::new(UnitDisk::new(*range_m)?),
        MediumConfig::FullMesh => Box::new(FullMesh),
        MediumConfig::LinkTable { links } => {
            let mut table = LinkTable::default();
            for link in links {
                table.add_link(link.from, link.to);
                if link.bidirectional {
                    table.add_link(link.to, link.from);
                }
            }
            Box::new(table)
        }
        MediumConfig::Silent => Box::new(Silent),
    })
}
