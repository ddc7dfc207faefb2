//! The "GEOMETRY" layer - Detector Volumes and Containment
//!
//! Every containment decision in the pipeline reduces to "is this point in
//! one of these boxes":
//! - Fiducial volumes decide whether a *vertex* is usable
//! - Containment volumes decide whether a *track* stops inside the detector
//! - Cryostat / TPC volumes describe the module partition of the detector
//!
//! The fiducial and containment sets are configured independently and are
//! never substituted for one another.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::RecoError;

// ============================================================================
// VOLUME
// ============================================================================

/// An axis-aligned box in detector coordinates (cm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Volume {
    /// Create a volume from its two corners.
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self {
            min: Vector3::from(min),
            max: Vector3::from(max),
        }
    }

    /// Inclusive containment test.
    #[inline]
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// A volume is well formed when every lower bound is finite and not
    /// above its upper bound.
    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| self.min[i].is_finite() && self.max[i].is_finite() && self.min[i] <= self.max[i])
    }
}

/// True iff `point` lies in at least one of `volumes`.
pub fn point_in_volumes(point: &Vector3<f64>, volumes: &[Volume]) -> bool {
    volumes.iter().any(|v| v.contains(point))
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Detector geometry used by all containment decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Vertex fiducial volumes
    pub fiducial_volumes: Vec<Volume>,

    /// Volumes used for the track containment flag
    pub containment_volumes: Vec<Volume>,

    /// One entry per cryostat
    pub cryostat_volumes: Vec<Volume>,

    /// Active TPC volumes, grouped by cryostat (same order as `cryostat_volumes`)
    pub tpc_volumes: Vec<Vec<Volume>>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        // Single cryostat, two drift modules split at the cathode (x = 0)
        Self {
            fiducial_volumes: vec![
                Volume::new([-190.0, -190.0, 10.0], [-5.0, 190.0, 450.0]),
                Volume::new([5.0, -190.0, 10.0], [190.0, 190.0, 450.0]),
            ],
            containment_volumes: vec![Volume::new([-195.0, -195.0, 5.0], [195.0, 195.0, 495.0])],
            cryostat_volumes: vec![Volume::new([-200.0, -200.0, 0.0], [200.0, 200.0, 500.0])],
            tpc_volumes: vec![vec![
                Volume::new([-200.0, -200.0, 0.0], [0.0, 200.0, 500.0]),
                Volume::new([0.0, -200.0, 0.0], [200.0, 200.0, 500.0]),
            ]],
        }
    }
}

impl GeometryConfig {
    /// Reject malformed volumes and an inconsistent module partition.
    pub fn validate(&self) -> Result<(), RecoError> {
        let named = [
            ("fiducial", &self.fiducial_volumes),
            ("containment", &self.containment_volumes),
            ("cryostat", &self.cryostat_volumes),
        ];
        for (name, set) in named {
            if let Some(i) = set.iter().position(|v| !v.is_valid()) {
                return Err(RecoError::config(format!("{} volume {} is malformed", name, i)));
            }
        }
        if self.tpc_volumes.len() != self.cryostat_volumes.len() {
            return Err(RecoError::config(format!(
                "{} TPC groups configured for {} cryostats",
                self.tpc_volumes.len(),
                self.cryostat_volumes.len()
            )));
        }
        for (c, group) in self.tpc_volumes.iter().enumerate() {
            if let Some(i) = group.iter().position(|v| !v.is_valid()) {
                return Err(RecoError::config(format!("TPC volume {} of cryostat {} is malformed", i, c)));
            }
        }
        Ok(())
    }

    /// Vertex containment (fiducial volumes).
    pub fn contained_in_fv(&self, point: &Vector3<f64>) -> bool {
        point_in_volumes(point, &self.fiducial_volumes)
    }

    /// Index of the first cryostat containing `point`.
    pub fn cryostat_of(&self, point: &Vector3<f64>) -> Option<usize> {
        self.cryostat_volumes.iter().position(|v| v.contains(point))
    }

    /// (cryostat, tpc) of the first TPC module containing `point`.
    pub fn tpc_of(&self, point: &Vector3<f64>) -> Option<(usize, usize)> {
        let cryo = self.cryostat_of(point)?;
        let tpc = self.tpc_volumes[cryo].iter().position(|v| v.contains(point))?;
        Some((cryo, tpc))
    }

    /// Evaluate the topology flags of a trajectory.
    ///
    /// The start point picks the cryostat and TPC; containment in either
    /// requires every trajectory point to stay inside it.
    pub fn track_topology(&self, trajectory: &[Vector3<f64>]) -> TrackTopology {
        let (start, end) = match (trajectory.first(), trajectory.last()) {
            (Some(s), Some(e)) => (s, e),
            _ => return TrackTopology::default(),
        };

        let cryo = self.cryostat_of(start);
        let contained_in_cryo = cryo
            .map(|c| trajectory.iter().all(|p| self.cryostat_volumes[c].contains(p)))
            .unwrap_or(false);

        let start_tpc = self.tpc_of(start);
        let contained_in_tpc = start_tpc
            .map(|(c, t)| trajectory.iter().all(|p| self.tpc_volumes[c][t].contains(p)))
            .unwrap_or(false);

        let crosses_tpc = match (start_tpc, self.tpc_of(end)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        };

        let is_contained = trajectory
            .iter()
            .all(|p| point_in_volumes(p, &self.containment_volumes));

        TrackTopology {
            contained_in_tpc,
            contained_in_cryo,
            crosses_tpc,
            is_contained,
        }
    }
}

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Containment flags of one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTopology {
    /// Whole trajectory inside the TPC module holding its start
    pub contained_in_tpc: bool,

    /// Whole trajectory inside the cryostat holding its start
    pub contained_in_cryo: bool,

    /// Start and end lie in different TPC modules
    pub crosses_tpc: bool,

    /// Whole trajectory inside the containment volumes
    pub is_contained: bool,
}
