//! Mote identifiers and positions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a mote within a simulation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MoteId(pub u32);

impl MoteId {
    /// Create a new mote ID.
    pub const fn new(id: u32) -> Self {
        MoteId(id)
    }
}

impl fmt::Display for MoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mote:{}", self.0)
    }
}

/// Position of a mote in the simulated area, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    #[serde(default)]
    pub z: f64,
}

impl Position {
    /// Create a position on the ground plane.
    pub const fn new(x: f64, y: f64) -> Self {
        Position { x, y, z: 0.0 }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_mote_id_display() {
        assert_eq!(MoteId::new(7).to_string(), "mote:7");
    }
}
