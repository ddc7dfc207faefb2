//! Typed per-event records handed to the reconstruction core.
//!
//! Positions are detector coordinates in cm, times are in µs relative to the
//! trigger, momenta and energies are in GeV. Every collection in
//! [`EventRecords`] defaults to empty so that an absent product simply
//! deserializes as "nothing recorded".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A point in detector coordinates [x, y, z] (cm).
pub type Point = [f64; 3];

/// A node in the particle-flow hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PfParticleRecord {
    /// Identifier of this node (unique within the event)
    pub id: usize,

    /// Hypothesis PDG code assigned by the particle-flow reconstruction
    #[serde(default)]
    pub pdg: i32,

    /// Parent node, `None` for top-level candidates
    #[serde(default)]
    pub parent: Option<usize>,

    /// Child node identifiers
    #[serde(default)]
    pub daughters: Vec<usize>,

    /// Metadata flag "is_clear_cosmic"
    #[serde(default)]
    pub is_clear_cosmic: bool,

    /// Metadata flag "is_neutrino"
    #[serde(default)]
    pub is_neutrino: bool,

    /// Metadata neutrino score
    #[serde(default)]
    pub nu_score: f64,

    /// Candidate vertex positions
    #[serde(default)]
    pub vertices: Vec<Point>,

    /// Identifier of the 3-D track built from this node, if any
    #[serde(default)]
    pub track_id: Option<usize>,
}

/// One calorimetry sample along a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaloPoint {
    /// Energy loss per unit length (MeV/cm)
    pub dedx: f64,

    /// Distance to the end of the track (cm)
    pub residual_range: f64,

    /// Track pitch through the wire cell (cm)
    pub pitch: f64,
}

/// A reconstructed 3-D track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Opaque backing identifier
    pub id: usize,

    /// Ordered trajectory points
    pub trajectory: Vec<Point>,

    /// Per-point calorimetry samples
    #[serde(default)]
    pub calo: Vec<CaloPoint>,

    /// Identifiers of the hits making up the track
    #[serde(default)]
    pub hit_ids: Vec<usize>,

    /// Track time estimate (µs), if one was assigned
    #[serde(default)]
    pub t0: Option<f64>,
}

/// Energy a truth particle deposited into a hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitTruthShare {
    /// Truth particle track id
    pub particle_id: i32,

    /// Deposited energy (MeV)
    pub energy: f64,
}

/// A TPC hit with its truth backlinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub id: usize,

    #[serde(default)]
    pub peak_time: f64,

    /// (cryostat, TPC) the hit was read out on
    #[serde(default)]
    pub tpc: Option<(usize, usize)>,

    /// Contributing truth particles
    #[serde(default)]
    pub truth: Vec<HitTruthShare>,
}

/// A hit in the external veto/timing detector (CRT).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrtHitRecord {
    pub position: Point,

    /// Hit time (µs)
    pub time: f64,

    #[serde(default)]
    pub pe: f64,
}

/// A track reconstructed by the CRT from two hits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrtTrackRecord {
    pub start: Point,
    pub end: Point,

    /// Track time (µs)
    pub time: f64,
}

/// A light-collection flash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlashRecord {
    /// Flash time (µs)
    pub time: f64,

    /// Time of the earliest constituent optical hit (µs)
    pub time_first: f64,

    /// Time spread of the flash (µs)
    pub time_width: f64,

    /// Total photo-electrons
    #[serde(default)]
    pub pe: f64,

    /// Light-weighted centre
    #[serde(default)]
    pub center: Point,
}

/// Generator origin of a truth record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Origin {
    #[default]
    Unknown,
    BeamNeutrino,
    CosmicRay,
    SuperNova,
    SingleParticle,
}

impl Origin {
    /// Integer code used in flat output.
    pub fn code(self) -> i32 {
        match self {
            Origin::Unknown => 0,
            Origin::BeamNeutrino => 1,
            Origin::CosmicRay => 2,
            Origin::SuperNova => 3,
            Origin::SingleParticle => 4,
        }
    }
}

/// Charged- or neutral-current interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Current {
    Charged,
    Neutral,
}

impl Current {
    /// 0 = CC, 1 = NC
    pub fn code(self) -> i32 {
        match self {
            Current::Charged => 0,
            Current::Neutral => 1,
        }
    }
}

/// The neutrino part of a truth record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeutrinoRecord {
    pub pdg: i32,
    pub vertex: Point,

    /// Neutrino energy (GeV)
    pub energy: f64,

    pub current: Current,
}

/// One generator-level truth record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthRecord {
    /// Index of this record in the event's truth list
    pub index: usize,

    #[serde(default)]
    pub origin: Origin,

    #[serde(default)]
    pub neutrino: Option<NeutrinoRecord>,

    /// Event weights: calculator name -> per-universe weights
    #[serde(default)]
    pub weights: HashMap<String, Vec<f64>>,
}

/// A simulated particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McParticleRecord {
    /// Simulation track id (unique within the event)
    pub track_id: i32,

    pub pdg: i32,

    /// Mother track id, 0 for generator primaries
    #[serde(default)]
    pub mother: i32,

    /// Index of the truth record that produced this particle
    pub truth_index: usize,

    /// Initial four-momentum [px, py, pz, E] (GeV)
    pub momentum: [f64; 4],

    /// True trajectory, may be empty when truth information was dropped
    #[serde(default)]
    pub trajectory: Vec<Point>,
}

impl McParticleRecord {
    /// Whether the particle came straight out of the generator.
    pub fn is_primary(&self) -> bool {
        self.mother == 0
    }

    /// Magnitude of the initial three-momentum.
    pub fn momentum_magnitude(&self) -> f64 {
        let [px, py, pz, _] = self.momentum;
        (px * px + py * py + pz * pz).sqrt()
    }
}

/// Every collection recorded for one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecords {
    #[serde(default)]
    pub run: u32,
    #[serde(default)]
    pub subrun: u32,
    #[serde(default)]
    pub event: u64,

    #[serde(default)]
    pub particles: Vec<PfParticleRecord>,
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub hits: Vec<HitRecord>,
    #[serde(default)]
    pub crt_hits: Vec<CrtHitRecord>,
    #[serde(default)]
    pub crt_tracks: Vec<CrtTrackRecord>,
    #[serde(default)]
    pub flashes: Vec<FlashRecord>,
    #[serde(default)]
    pub truths: Vec<TruthRecord>,
    #[serde(default)]
    pub mc_particles: Vec<McParticleRecord>,
}

impl EventRecords {
    /// Creates an empty event with the given identifiers.
    pub fn new(run: u32, subrun: u32, event: u64) -> Self {
        Self {
            run,
            subrun,
            event,
            ..Default::default()
        }
    }

    /// Whether any simulation truth was recorded.
    pub fn has_truth(&self) -> bool {
        !self.truths.is_empty()
    }
}
