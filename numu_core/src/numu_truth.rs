//! The "TRUTH" Engine - Hit-Level Truth Association
//!
//! Associates reconstructed objects with simulation truth:
//! - Track → truth particle by energy-weighted hit completeness
//! - Interaction → truth interaction by vertex distance and primary-track match
//! - Truth interactions and truth-only tracks built straight from the records
//!
//! Ambiguity never produces an arbitrary answer: a track whose hits share
//! no energy with any truth particle is `Unmatched`.

use nalgebra::Vector3;
use numu_records::{Current, EventRecords, HitRecord, McParticleRecord, Origin, TruthRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::error::RecoError;
use crate::numu_assembler::RecoInteraction;
use crate::numu_geometry::GeometryConfig;
use crate::numu_kinematics::{mass_for_pdg, RecoTrack, TrackSource};
use crate::numu_slice::RecoSlice;
use crate::select::{select_max_by, select_min_by};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for truth association
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TruthConfig {
    /// Reco/truth vertex distance within which the vertex counts as matched (cm)
    pub track_match_containment_cut: f64,

    /// Keep truth particles whose trajectory was not recorded
    pub shaky_mc_tracks: bool,

    /// Minimum kinetic energy of a primary charged particle to count
    /// towards the truth multiplicity (GeV)
    pub true_track_min_kinetic_energy: f64,
}

impl Default for TruthConfig {
    fn default() -> Self {
        Self {
            track_match_containment_cut: 10.0,
            shaky_mc_tracks: false,
            true_track_min_kinetic_energy: 0.021,
        }
    }
}

impl TruthConfig {
    pub fn validate(&self) -> Result<(), RecoError> {
        if !(self.track_match_containment_cut >= 0.0) {
            return Err(RecoError::config("track_match_containment_cut must be non-negative"));
        }
        Ok(())
    }
}

// ============================================================================
// MATCH RECORDS
// ============================================================================

/// Truth information of a matched track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthParticleMatch {
    /// Index of the generating truth record
    pub mctruth_index: usize,
    pub mctruth_has_neutrino: bool,
    pub mctruth_vertex: Option<Vector3<f64>>,
    pub mctruth_origin: Origin,
    pub mctruth_ccnc: Option<Current>,
    pub mcparticle_id: i32,
    /// Energy-weighted hit completeness in [0, 1]
    pub completion: f64,
    pub match_pdg: i32,
}

/// Result of associating one track with truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackTruthMatch {
    Unmatched,
    Matched(TruthParticleMatch),
}

impl TrackTruthMatch {
    pub fn has_match(&self) -> bool {
        matches!(self, TrackTruthMatch::Matched(_))
    }

    pub fn matched(&self) -> Option<&TruthParticleMatch> {
        match self {
            TrackTruthMatch::Matched(m) => Some(m),
            TrackTruthMatch::Unmatched => None,
        }
    }
}

/// Interaction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionMode {
    ChargedCurrent,
    NeutralCurrent,
    Cosmic,
    Other,
    /// Aggregate over every mode, used by cut-flow bookkeeping
    All,
}

impl InteractionMode {
    pub fn code(self) -> i32 {
        match self {
            InteractionMode::ChargedCurrent => 0,
            InteractionMode::NeutralCurrent => 1,
            InteractionMode::Cosmic => 2,
            InteractionMode::Other => 3,
            InteractionMode::All => 4,
        }
    }

    fn from_current(current: Option<Current>) -> Self {
        match current {
            Some(Current::Charged) => InteractionMode::ChargedCurrent,
            Some(Current::Neutral) => InteractionMode::NeutralCurrent,
            None => InteractionMode::Other,
        }
    }
}

/// What kind of truth produced the primary track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackMode {
    Other,
    Cosmic,
    Neutrino,
}

impl TrackMode {
    pub fn code(self) -> i32 {
        match self {
            TrackMode::Other => -1,
            TrackMode::Cosmic => 1,
            TrackMode::Neutrino => 2,
        }
    }
}

/// Interaction-level truth match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthMatch {
    pub has_match: bool,
    pub mode: InteractionMode,
    pub tmode: TrackMode,
    /// Truth record index of the vertex-matched truth interaction
    pub mctruth_vertex_id: Option<usize>,
    /// Index into the event's truth interaction list of the vertex match
    pub event_vertex_id: Option<usize>,
    /// Truth record index that produced the primary track
    pub mctruth_track_id: Option<usize>,
    /// Index into the event's truth interaction list of the track match
    pub event_track_id: Option<usize>,
    pub truth_vertex_distance: Option<f64>,
    pub is_misreconstructed: bool,
}

impl TruthMatch {
    pub fn unmatched() -> Self {
        Self {
            has_match: false,
            mode: InteractionMode::Other,
            tmode: TrackMode::Other,
            mctruth_vertex_id: None,
            event_vertex_id: None,
            mctruth_track_id: None,
            event_track_id: None,
            truth_vertex_distance: None,
            is_misreconstructed: false,
        }
    }

    /// Whether the nearest truth vertex lies within `tolerance` (cm).
    pub fn vertex_matched(&self, tolerance: f64) -> bool {
        self.truth_vertex_distance.is_some_and(|d| d <= tolerance)
    }
}

// ============================================================================
// TRUTH INDEX
// ============================================================================

/// Whether a PDG code leaves a visible track.
pub fn is_charged_track(pdg: i32) -> bool {
    matches!(pdg.abs(), 11 | 13 | 211 | 321 | 2212)
}

/// Event-wide hit and particle bookkeeping for truth association.
pub struct TruthIndex<'a> {
    hits: HashMap<usize, &'a HitRecord>,
    /// Total energy each truth particle deposited across all hits
    particle_energy: HashMap<i32, f64>,
    particles: HashMap<i32, &'a McParticleRecord>,
    truths: &'a [TruthRecord],
}

impl<'a> TruthIndex<'a> {
    pub fn new(records: &'a EventRecords) -> Self {
        let mut particle_energy: HashMap<i32, f64> = HashMap::new();
        for hit in &records.hits {
            for share in &hit.truth {
                *particle_energy.entry(share.particle_id).or_insert(0.0) += share.energy.max(0.0);
            }
        }
        Self {
            hits: records.hits.iter().map(|h| (h.id, h)).collect(),
            particle_energy,
            particles: records.mc_particles.iter().map(|p| (p.track_id, p)).collect(),
            truths: &records.truths,
        }
    }

    /// Truth record by its index.
    pub fn truth(&self, index: usize) -> Option<&'a TruthRecord> {
        self.truths.iter().find(|t| t.index == index)
    }

    /// Unique hits of a track that exist in the event.
    fn track_hits(&self, hit_ids: &[usize]) -> Vec<&'a HitRecord> {
        let mut seen = HashSet::new();
        hit_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| self.hits.get(id).copied())
            .collect()
    }

    /// Fraction of a truth particle's deposited energy found in the given
    /// hits. 0 when the particle deposited nothing.
    pub fn track_completion(&self, mcparticle_id: i32, hit_ids: &[usize]) -> f64 {
        let total = match self.particle_energy.get(&mcparticle_id) {
            Some(&e) if e > 0.0 => e,
            _ => return 0.0,
        };
        let matched: f64 = self
            .track_hits(hit_ids)
            .iter()
            .flat_map(|h| h.truth.iter())
            .filter(|s| s.particle_id == mcparticle_id)
            .map(|s| s.energy.max(0.0))
            .sum();
        (matched / total).clamp(0.0, 1.0)
    }

    /// Match a track's hits to the truth particle with the highest
    /// completeness.
    pub fn match_track_to_truth(&self, hit_ids: &[usize]) -> TrackTruthMatch {
        let candidates: BTreeSet<i32> = self
            .track_hits(hit_ids)
            .iter()
            .flat_map(|h| h.truth.iter())
            .filter(|s| s.energy > 0.0)
            .map(|s| s.particle_id)
            .collect();

        let Some((mcparticle_id, completion)) =
            select_max_by(candidates, |&id| Some(self.track_completion(id, hit_ids)).filter(|c| *c > 0.0))
        else {
            return TrackTruthMatch::Unmatched;
        };

        let Some(particle) = self.particles.get(&mcparticle_id) else {
            debug!("Matched truth particle {} has no particle record", mcparticle_id);
            return TrackTruthMatch::Unmatched;
        };
        TrackTruthMatch::Matched(self.particle_match(particle, completion))
    }

    fn particle_match(&self, particle: &McParticleRecord, completion: f64) -> TruthParticleMatch {
        let truth = self.truth(particle.truth_index);
        let neutrino = truth.and_then(|t| t.neutrino.as_ref());
        TruthParticleMatch {
            mctruth_index: particle.truth_index,
            mctruth_has_neutrino: neutrino.is_some(),
            mctruth_vertex: neutrino.map(|n| Vector3::from(n.vertex)),
            mctruth_origin: truth.map(|t| t.origin).unwrap_or_default(),
            mctruth_ccnc: neutrino.map(|n| n.current),
            mcparticle_id: particle.track_id,
            completion,
            match_pdg: particle.pdg,
        }
    }

    // ========================================================================
    // TRUTH INTERACTIONS
    // ========================================================================

    /// Build a track record straight from a simulated particle.
    ///
    /// `None` when the trajectory is missing and shaky tracks are not allowed.
    pub fn truth_track(
        &self,
        particle: &McParticleRecord,
        geometry: &GeometryConfig,
        direction_length: f64,
        config: &TruthConfig,
    ) -> Option<RecoTrack> {
        if particle.trajectory.is_empty() && !config.shaky_mc_tracks {
            debug!("Skipping truth particle {} without trajectory", particle.track_id);
            return None;
        }
        let mut track = RecoTrack::empty(TrackSource::Truth(particle.track_id));
        let trajectory: Vec<Vector3<f64>> = particle.trajectory.iter().map(|p| Vector3::from(*p)).collect();
        track.fill_geometry(&trajectory, geometry, direction_length);

        let p = particle.momentum_magnitude();
        track.momentum = Some(p);
        track.energy = Some(particle.momentum[3].max((p * p + mass_for_pdg(particle.pdg).powi(2)).sqrt()));
        track.pdgid = Some(particle.pdg);
        track.is_muon = particle.pdg.abs() == 13;
        track.truth = TrackTruthMatch::Matched(self.particle_match(particle, 1.0));
        Some(track)
    }

    /// Truth tracks for every primary charged particle in the event.
    pub fn true_tracks(
        &self,
        geometry: &GeometryConfig,
        direction_length: f64,
        config: &TruthConfig,
    ) -> HashMap<i32, RecoTrack> {
        self.particles
            .values()
            .filter(|p| p.is_primary() && is_charged_track(p.pdg))
            .filter_map(|p| Some((p.track_id, self.truth_track(p, geometry, direction_length, config)?)))
            .collect()
    }

    /// One truth interaction per truth record that contains a neutrino.
    pub fn truth_interactions(
        &self,
        geometry: &GeometryConfig,
        direction_length: f64,
        config: &TruthConfig,
    ) -> Vec<RecoInteraction> {
        let mut out = Vec::new();
        for truth in self.truths {
            let Some(neutrino) = &truth.neutrino else {
                continue;
            };
            let event_index = out.len();

            let mut primaries: Vec<&McParticleRecord> = self
                .particles
                .values()
                .copied()
                .filter(|p| p.truth_index == truth.index && p.is_primary())
                .collect();
            primaries.sort_by_key(|p| p.track_id);

            let mut slice = RecoSlice::default();
            for p in primaries.iter().filter(|p| is_charged_track(p.pdg)) {
                let Ok(key) = usize::try_from(p.track_id) else {
                    continue;
                };
                if let Some(track) = self.truth_track(p, geometry, direction_length, config) {
                    slice.tracks.insert(key, track);
                }
            }

            let primary_muon = select_max_by(
                primaries.iter().filter(|p| p.pdg.abs() == 13),
                |p| Some(p.momentum[3]),
            )
            .and_then(|(p, _)| usize::try_from(p.track_id).ok())
            .filter(|key| slice.tracks.contains_key(key));
            slice.primary_track_index = primary_muon;

            let multiplicity = primaries
                .iter()
                .filter(|p| is_charged_track(p.pdg))
                .filter(|p| p.momentum[3] - mass_for_pdg(p.pdg) > config.true_track_min_kinetic_energy)
                .count();

            let truth_match = TruthMatch {
                has_match: true,
                mode: InteractionMode::from_current(Some(neutrino.current)),
                tmode: TrackMode::Neutrino,
                mctruth_vertex_id: Some(truth.index),
                event_vertex_id: Some(event_index),
                mctruth_track_id: primary_muon.map(|_| truth.index),
                event_track_id: primary_muon.map(|_| event_index),
                truth_vertex_distance: Some(0.0),
                is_misreconstructed: false,
            };

            let primary_track = primary_muon.and_then(|k| slice.tracks.get(&k).cloned());
            let position = Vector3::from(neutrino.vertex);
            out.push(RecoInteraction {
                slice,
                position: Some(position),
                is_fiducial: geometry.contained_in_fv(&position),
                nu_energy: Some(neutrino.energy),
                truth_match,
                multiplicity,
                primary_track,
            });
        }
        out
    }
}

// ============================================================================
// INTERACTION MATCHING
// ============================================================================

/// Match a reconstructed interaction against the event's truth interactions.
///
/// The vertex is matched to the nearest truth vertex; the primary track
/// carries its own particle-level match. The two are combined into one
/// classification.
pub fn match_interaction_to_truth(
    vertex: Option<&Vector3<f64>>,
    primary_track: Option<&RecoTrack>,
    truth_interactions: &[RecoInteraction],
    config: &TruthConfig,
) -> TruthMatch {
    let mut m = TruthMatch::unmatched();

    let nearest = vertex.and_then(|v| {
        select_min_by(
            truth_interactions.iter().enumerate(),
            |(_, ti)| ti.position.map(|p| (p - v).norm()),
        )
    });
    if let Some(((event_index, ti), distance)) = nearest {
        m.event_vertex_id = Some(event_index);
        m.mctruth_vertex_id = ti.truth_match.mctruth_vertex_id;
        m.truth_vertex_distance = Some(distance);
    }
    let vertex_ok = m.vertex_matched(config.track_match_containment_cut);

    let track_match = primary_track.and_then(|t| t.truth.matched());
    if let Some(tm) = track_match {
        m.mctruth_track_id = Some(tm.mctruth_index);
        m.event_track_id = truth_interactions
            .iter()
            .position(|ti| ti.truth_match.mctruth_vertex_id == Some(tm.mctruth_index));
    }

    m.has_match = track_match.is_some() || vertex_ok;

    (m.mode, m.tmode) = match track_match {
        Some(tm) if tm.mctruth_origin == Origin::CosmicRay => (InteractionMode::Cosmic, TrackMode::Cosmic),
        Some(tm) if tm.mctruth_has_neutrino => (InteractionMode::from_current(tm.mctruth_ccnc), TrackMode::Neutrino),
        Some(_) => (InteractionMode::Other, TrackMode::Other),
        None if vertex_ok => {
            let mode = m
                .event_vertex_id
                .map(|i| truth_interactions[i].truth_match.mode)
                .unwrap_or(InteractionMode::Other);
            (mode, TrackMode::Other)
        }
        None => (InteractionMode::Other, TrackMode::Other),
    };

    m.is_misreconstructed = m.has_match
        && (!vertex_ok || track_match.is_none() || m.mctruth_track_id != m.mctruth_vertex_id);

    m
}
