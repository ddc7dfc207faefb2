//! Particle-flow hierarchy, slices and primary-track selection.
//!
//! The hierarchy is an identifier-keyed map; parents and daughters are
//! followed by lookup, never by reference. Each top-level particle seeds one
//! slice holding its whole descendant tree.

use nalgebra::Vector3;
use numu_records::PfParticleRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::error::RecoError;
use crate::numu_kinematics::{Hypothesis, RecoTrack};
use crate::select::select_max_by;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for primary-track selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Shortest track that may become the primary track (cm)
    pub primary_track_min_length: f64,

    /// Skip proton-identified candidates
    pub primary_track_reject_protons: bool,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            primary_track_min_length: 0.0,
            primary_track_reject_protons: false,
        }
    }
}

impl SliceConfig {
    pub fn validate(&self) -> Result<(), RecoError> {
        if !(self.primary_track_min_length >= 0.0) {
            return Err(RecoError::config("primary_track_min_length must be non-negative"));
        }
        Ok(())
    }
}

// ============================================================================
// PARTICLES
// ============================================================================

/// A particle-flow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoParticle {
    pub id: usize,
    pub pdg: i32,
    pub parent: Option<usize>,
    pub daughters: Vec<usize>,
    pub is_clear_cosmic: bool,
    pub is_neutrino: bool,
    pub nu_score: f64,
    pub vertices: Vec<Vector3<f64>>,
    pub track_id: Option<usize>,
}

impl From<&PfParticleRecord> for RecoParticle {
    fn from(record: &PfParticleRecord) -> Self {
        Self {
            id: record.id,
            pdg: record.pdg,
            parent: record.parent,
            daughters: record.daughters.clone(),
            is_clear_cosmic: record.is_clear_cosmic,
            is_neutrino: record.is_neutrino,
            nu_score: record.nu_score,
            vertices: record.vertices.iter().map(|v| Vector3::from(*v)).collect(),
            track_id: record.track_id,
        }
    }
}

/// Identifier-keyed particle map.
pub fn reco_particles(records: &[PfParticleRecord]) -> HashMap<usize, RecoParticle> {
    records.iter().map(|r| (r.id, RecoParticle::from(r))).collect()
}

// ============================================================================
// SLICES
// ============================================================================

/// Particles hypothesised to come from one interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoSlice {
    /// Top-level particle id
    pub primary_index: Option<usize>,
    /// Key into `tracks` of the primary track
    pub primary_track_index: Option<usize>,
    pub particles: HashMap<usize, RecoParticle>,
    /// Tracks keyed by the id of the particle they belong to
    pub tracks: HashMap<usize, RecoTrack>,
}

impl RecoSlice {
    pub fn primary(&self) -> Option<&RecoParticle> {
        self.primary_index.and_then(|i| self.particles.get(&i))
    }

    pub fn primary_track(&self) -> Option<&RecoTrack> {
        self.primary_track_index.and_then(|i| self.tracks.get(&i))
    }

    /// Whether the top-level candidate is flagged as a clear cosmic.
    pub fn is_clear_cosmic(&self) -> bool {
        self.primary().map(|p| p.is_clear_cosmic).unwrap_or(false)
    }
}

/// One slice per top-level particle, in ascending id order.
///
/// `tracks` maps 3-D track id to its built record.
pub fn reco_slices(
    particles: &HashMap<usize, RecoParticle>,
    tracks: &HashMap<usize, RecoTrack>,
) -> Vec<RecoSlice> {
    let mut roots: Vec<usize> = particles
        .values()
        .filter(|p| p.parent.is_none())
        .map(|p| p.id)
        .collect();
    roots.sort_unstable();

    roots
        .into_iter()
        .map(|root| {
            let mut slice = RecoSlice {
                primary_index: Some(root),
                ..RecoSlice::default()
            };
            let mut seen = HashSet::new();
            let mut queue = VecDeque::from([root]);
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    continue;
                }
                let Some(particle) = particles.get(&id) else {
                    debug!("Particle {} referenced but not recorded", id);
                    continue;
                };
                if let Some(track) = particle.track_id.and_then(|t| tracks.get(&t)) {
                    slice.tracks.insert(id, track.clone());
                }
                queue.extend(particle.daughters.iter().copied());
                slice.particles.insert(id, particle.clone());
            }
            slice
        })
        .collect()
}

/// Drop slices whose top-level candidate is a clear cosmic.
pub fn select_slices(slices: Vec<RecoSlice>) -> Vec<RecoSlice> {
    slices
        .into_iter()
        .filter(|s| {
            let keep = !s.is_clear_cosmic();
            if !keep {
                debug!("Discarding clear-cosmic slice {:?}", s.primary_index);
            }
            keep
        })
        .collect()
}

/// Pick the longest acceptable track among the primary particle's own track
/// and its daughters' tracks.
pub fn select_primary_track(slice: &RecoSlice, config: &SliceConfig) -> Option<usize> {
    let primary = slice.primary()?;
    let candidates = std::iter::once(primary.id)
        .chain(primary.daughters.iter().copied())
        .filter(|id| slice.tracks.contains_key(id));

    select_max_by(candidates, |id| {
        let track = slice.tracks.get(id)?;
        let length = track.length?;
        if length < config.primary_track_min_length {
            return None;
        }
        if config.primary_track_reject_protons && track.pdgid == Some(Hypothesis::Proton.pdg()) {
            return None;
        }
        Some(length)
    })
    .map(|(id, _)| id)
}

// ============================================================================
// SLICE LIFE CYCLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceKind {
    Cosmic,
    Neutrino,
}

/// Life cycle of a slice through selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceState {
    Candidate,
    Evaluated(SliceKind),
    Discarded,
    /// Carries the `tracks` key of the chosen primary track
    RetainedWithPrimaryTrack(usize),
    RetainedWithoutPrimaryTrack,
}

impl SliceState {
    /// Advance one step. Terminal states stay where they are.
    pub fn advance(self, slice: &RecoSlice, config: &SliceConfig) -> SliceState {
        match self {
            SliceState::Candidate => {
                if slice.is_clear_cosmic() {
                    SliceState::Evaluated(SliceKind::Cosmic)
                } else {
                    SliceState::Evaluated(SliceKind::Neutrino)
                }
            }
            SliceState::Evaluated(SliceKind::Cosmic) => SliceState::Discarded,
            SliceState::Evaluated(SliceKind::Neutrino) => match select_primary_track(slice, config) {
                Some(key) => SliceState::RetainedWithPrimaryTrack(key),
                None => SliceState::RetainedWithoutPrimaryTrack,
            },
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SliceState::Discarded | SliceState::RetainedWithPrimaryTrack(_) | SliceState::RetainedWithoutPrimaryTrack
        )
    }

    pub fn is_retained(self) -> bool {
        matches!(self, SliceState::RetainedWithPrimaryTrack(_) | SliceState::RetainedWithoutPrimaryTrack)
    }

    pub fn primary_track_index(self) -> Option<usize> {
        match self {
            SliceState::RetainedWithPrimaryTrack(key) => Some(key),
            _ => None,
        }
    }

    /// Run a slice from `Candidate` to its terminal state.
    pub fn resolve(slice: &RecoSlice, config: &SliceConfig) -> SliceState {
        let mut state = SliceState::Candidate;
        while !state.is_terminal() {
            state = state.advance(slice, config);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numu_kinematics::TrackSource;

    fn pf(id: usize, parent: Option<usize>, daughters: &[usize], track_id: Option<usize>) -> PfParticleRecord {
        PfParticleRecord {
            id,
            pdg: if parent.is_none() { 14 } else { 13 },
            parent,
            daughters: daughters.to_vec(),
            is_clear_cosmic: false,
            is_neutrino: parent.is_none(),
            nu_score: 0.5,
            vertices: vec![[0.0, 0.0, 100.0]],
            track_id,
        }
    }

    fn track(id: usize, length: f64, pdg: i32) -> RecoTrack {
        let mut t = RecoTrack::empty(TrackSource::Reco(id));
        t.length = Some(length);
        t.pdgid = Some(pdg);
        t
    }

    /// Neutrino 0 → {1 (muon-like, 120 cm), 2 (proton-like, 150 cm) → 3 (40 cm)}; cosmic 10.
    fn event() -> (HashMap<usize, RecoParticle>, HashMap<usize, RecoTrack>) {
        let mut cosmic = pf(10, None, &[], Some(104));
        cosmic.is_clear_cosmic = true;
        let records = vec![
            pf(0, None, &[1, 2], None),
            pf(1, Some(0), &[], Some(101)),
            pf(2, Some(0), &[3], Some(102)),
            pf(3, Some(2), &[], Some(103)),
            cosmic,
        ];
        let tracks = [
            (101, track(101, 120.0, 13)),
            (102, track(102, 150.0, 2212)),
            (103, track(103, 40.0, 211)),
            (104, track(104, 300.0, 13)),
        ]
        .into_iter()
        .collect();
        (reco_particles(&records), tracks)
    }

    #[test]
    fn test_one_slice_per_top_level_particle() {
        let (particles, tracks) = event();
        let slices = reco_slices(&particles, &tracks);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].primary_index, Some(0));
        // Grand-daughter reached through the hierarchy
        assert_eq!(slices[0].particles.len(), 4);
        assert_eq!(slices[0].tracks.len(), 3);
        assert!(slices[0].tracks.contains_key(&3));
    }

    #[test]
    fn test_select_slices_drops_clear_cosmic() {
        let (particles, tracks) = event();
        let kept = select_slices(reco_slices(&particles, &tracks));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].primary_index, Some(0));
    }

    #[test]
    fn test_no_particles_no_slices() {
        let slices = reco_slices(&HashMap::new(), &HashMap::new());
        assert!(select_slices(slices).is_empty());
    }

    #[test]
    fn test_primary_track_longest_daughter() {
        let (particles, tracks) = event();
        let slices = reco_slices(&particles, &tracks);
        let cfg = SliceConfig::default();
        // Grand-daughter 3 is not a candidate
        assert_eq!(select_primary_track(&slices[0], &cfg), Some(2));
    }

    #[test]
    fn test_primary_track_reject_protons() {
        let (particles, tracks) = event();
        let slices = reco_slices(&particles, &tracks);
        let cfg = SliceConfig {
            primary_track_reject_protons: true,
            ..SliceConfig::default()
        };
        assert_eq!(select_primary_track(&slices[0], &cfg), Some(1));
    }

    #[test]
    fn test_primary_track_min_length() {
        let (particles, tracks) = event();
        let slices = reco_slices(&particles, &tracks);
        let cfg = SliceConfig {
            primary_track_min_length: 200.0,
            ..SliceConfig::default()
        };
        assert_eq!(select_primary_track(&slices[0], &cfg), None);
    }

    #[test]
    fn test_slice_life_cycle() {
        let (particles, tracks) = event();
        let slices = reco_slices(&particles, &tracks);
        let cfg = SliceConfig::default();

        let state = SliceState::resolve(&slices[0], &cfg);
        assert_eq!(state, SliceState::RetainedWithPrimaryTrack(2));
        assert_eq!(state.primary_track_index(), select_primary_track(&slices[0], &cfg));
        assert_eq!(SliceState::resolve(&slices[1], &cfg), SliceState::Discarded);

        let strict = SliceConfig {
            primary_track_min_length: 1000.0,
            ..SliceConfig::default()
        };
        let state = SliceState::resolve(&slices[0], &strict);
        assert_eq!(state, SliceState::RetainedWithoutPrimaryTrack);
        assert!(state.is_retained());
        assert_eq!(state.primary_track_index(), None);
        assert_eq!(state.advance(&slices[0], &strict), state);
    }

    #[test]
    fn test_cyclic_hierarchy_terminates() {
        let records = vec![pf(0, None, &[1], None), pf(1, Some(0), &[0], None)];
        let slices = reco_slices(&reco_particles(&records), &HashMap::new());
        assert_eq!(slices[0].particles.len(), 2);
    }
}
